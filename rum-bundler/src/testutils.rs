use crate::domain_key::{DomainKey, DomainKeyProvider};
use crate::fetcher::{BundleSource, FetchError};
use crate::types::{BundleChunk, BundleEndpoint, Event, RumBundle};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn event(checkpoint: &str, source: &str, target: &str) -> Event {
    Event::new(checkpoint, source, target)
}

pub fn bundle(url: &str, weight: u64, events: Vec<Event>) -> RumBundle {
    RumBundle::new(url, weight, events)
}

/// In-memory bundle source.
///
/// By default every endpoint returns a single bundle whose url is the
/// endpoint path, so results can be traced back to the endpoint they came
/// from. The first `failures` calls fail with a 503.
#[derive(Default)]
pub struct MemorySource {
    bundles: Option<Vec<RumBundle>>,
    failures: Mutex<u32>,
    calls: AtomicUsize,
    seen_keys: Mutex<Vec<DomainKey>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every endpoint returns a copy of `bundles`.
    pub fn with_bundles(bundles: Vec<RumBundle>) -> Self {
        MemorySource {
            bundles: Some(bundles),
            ..Self::new()
        }
    }

    pub fn failing_first(self, failures: u32) -> Self {
        *self.failures.lock().unwrap() = failures;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_keys(&self) -> Vec<DomainKey> {
        self.seen_keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl BundleSource for MemorySource {
    async fn fetch_chunk(&self, endpoint: &BundleEndpoint) -> Result<BundleChunk, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_keys
            .lock()
            .unwrap()
            .push(endpoint.domain_key.clone());

        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(FetchError::Status {
                    path: endpoint.path(),
                    status: StatusCode::SERVICE_UNAVAILABLE,
                });
            }
        }

        let rum_bundles = match &self.bundles {
            Some(bundles) => bundles.clone(),
            None => vec![bundle(
                &endpoint.path(),
                1,
                vec![event("experiment", "synthetic", "control")],
            )],
        };
        Ok(BundleChunk { rum_bundles })
    }
}

pub struct FixedKeyProvider {
    key: DomainKey,
    calls: AtomicUsize,
}

impl FixedKeyProvider {
    pub fn new(key: DomainKey) -> Self {
        FixedKeyProvider {
            key,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DomainKeyProvider for FixedKeyProvider {
    async fn resolve(&self, _domain: &str) -> DomainKey {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.key.clone()
    }
}
