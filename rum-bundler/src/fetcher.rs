//! Windowed bundle retrieval.
//!
//! A time window expands into one endpoint per hour (or per day). Endpoints
//! are requested in fixed-size batches: every request in a batch runs
//! concurrently, and the next batch only starts once the current one has
//! fully succeeded. A batch with any failed request is re-run from scratch
//! according to the configured `RetryPolicy`.

use crate::config::{DEFAULT_BATCH_SIZE, RumConfig};
use crate::domain_key::{DomainKey, DomainKeyProvider, DomainKeyResolver};
use crate::metrics_defs::{FETCH_BATCH_DURATION, FETCH_BATCH_RETRIES, FETCH_BUNDLES};
use crate::retry::RetryPolicy;
use crate::types::{BundleChunk, BundleEndpoint, RumBundle, TimeWindow};
use async_trait::async_trait;
use reqwest::StatusCode;
use shared::{counter, histogram};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep};
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("unexpected status {status} for {path}")]
    Status { path: String, status: StatusCode },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("batch {batch} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        batch: usize,
        attempts: u32,
        source: Box<FetchError>,
    },

    #[error("fetch task failed: {0}")]
    TaskError(#[from] tokio::task::JoinError),
}

impl FetchError {
    /// Whether re-running the batch could succeed. Bad URLs and panicked
    /// tasks fail the whole fetch immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::ReqwestError(_) | FetchError::Status { .. }
        )
    }
}

/// Anything that can return the bundles behind one endpoint.
#[async_trait]
pub trait BundleSource: Send + Sync {
    async fn fetch_chunk(&self, endpoint: &BundleEndpoint) -> Result<BundleChunk, FetchError>;
}

/// Bundle source backed by the RUM bundle HTTP API.
#[derive(Clone)]
pub struct HttpBundleSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBundleSource {
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        HttpBundleSource { client, base_url }
    }
}

#[async_trait]
impl BundleSource for HttpBundleSource {
    async fn fetch_chunk(&self, endpoint: &BundleEndpoint) -> Result<BundleChunk, FetchError> {
        let url = endpoint
            .url(&self.base_url)
            .ok_or_else(|| FetchError::InvalidUrl(self.base_url.to_string()))?;

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                path: endpoint.path(),
                status: response.status(),
            });
        }

        Ok(response.json::<BundleChunk>().await?)
    }
}

#[derive(Clone)]
pub struct BundleFetcher {
    source: Arc<dyn BundleSource>,
    keys: Arc<dyn DomainKeyProvider>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl BundleFetcher {
    pub fn new(source: Arc<dyn BundleSource>, keys: Arc<dyn DomainKeyProvider>) -> Self {
        BundleFetcher {
            source,
            keys,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    /// Builds a fetcher talking HTTP to `config.base_url`. The domain key
    /// resolver reads its token from the environment.
    pub fn from_config(config: &RumConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;

        let source = HttpBundleSource::new(client.clone(), config.base_url.clone());
        let keys = DomainKeyResolver::from_env(client, config.base_url.clone());

        Ok(Self::new(Arc::new(source), Arc::new(keys))
            .with_batch_size(config.batch_size)
            .with_retry_policy(config.retry.clone()))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Fetches every bundle in `window` for `domain`, in endpoint order.
    ///
    /// Without a `domain_key` one is resolved first. With `checkpoints`, events
    /// of any other checkpoint are dropped from each bundle as it arrives.
    pub async fn fetch(
        &self,
        domain: &str,
        window: &TimeWindow,
        domain_key: Option<DomainKey>,
        checkpoints: Option<&HashSet<String>>,
    ) -> Result<Vec<RumBundle>, FetchError> {
        if window.is_empty() {
            return Ok(Vec::new());
        }

        let domain_key = match domain_key {
            Some(key) => key,
            None => self.keys.resolve(domain).await,
        };

        let endpoints = window.endpoints(domain, &domain_key);
        let mut bundles = Vec::new();

        for (index, batch) in endpoints.chunks(self.batch_size).enumerate() {
            let started = Instant::now();
            let chunks = self.fetch_batch_with_retry(index, batch).await?;
            histogram!(FETCH_BATCH_DURATION).record(started.elapsed().as_secs_f64());

            let before = bundles.len();
            for chunk in chunks {
                for mut bundle in chunk.rum_bundles {
                    if let Some(checkpoints) = checkpoints {
                        bundle.retain_checkpoints(checkpoints);
                    }
                    bundles.push(bundle);
                }
            }
            tracing::debug!(
                batch = index,
                endpoints = batch.len(),
                bundles = bundles.len() - before,
                "Fetched bundle batch"
            );
        }

        counter!(FETCH_BUNDLES).increment(bundles.len() as u64);
        tracing::info!(
            domain,
            endpoints = endpoints.len(),
            bundles = bundles.len(),
            "Fetched RUM bundles"
        );

        Ok(bundles)
    }

    /// Fetches the last 31 days, hour by hour, resolving the domain key.
    pub async fn fetch_last_month(&self, domain: &str) -> Result<Vec<RumBundle>, FetchError> {
        self.fetch(domain, &TimeWindow::last_month(), None, None)
            .await
    }

    async fn fetch_batch_with_retry(
        &self,
        index: usize,
        batch: &[BundleEndpoint],
    ) -> Result<Vec<BundleChunk>, FetchError> {
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);

            let err = match self.fetch_batch(batch).await {
                Ok(chunks) => return Ok(chunks),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            if !self.retry.allows_retry(attempts) {
                return Err(FetchError::RetriesExhausted {
                    batch: index,
                    attempts,
                    source: Box::new(err),
                });
            }

            let delay = self.retry.delay_for(attempts - 1);
            tracing::warn!(
                batch = index,
                attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Bundle batch failed, retrying"
            );
            counter!(FETCH_BATCH_RETRIES).increment(1);
            sleep(delay).await;
        }
    }

    /// Runs every request of the batch concurrently and waits for all of them.
    /// Chunks come back in endpoint order.
    async fn fetch_batch(&self, batch: &[BundleEndpoint]) -> Result<Vec<BundleChunk>, FetchError> {
        let mut join_set = JoinSet::new();

        for (position, endpoint) in batch.iter().cloned().enumerate() {
            let source = self.source.clone();
            join_set.spawn(async move { (position, source.fetch_chunk(&endpoint).await) });
        }

        let mut chunks: Vec<Option<BundleChunk>> = vec![None; batch.len()];
        let mut failure = None;

        while let Some(joined) = join_set.join_next().await {
            let (position, result) = joined?;
            match result {
                Ok(chunk) => chunks[position] = Some(chunk),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(chunks.into_iter().flatten().collect()),
        }
    }
}
