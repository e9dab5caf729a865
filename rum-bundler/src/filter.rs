//! Bundle selection by exact field values.
//!
//! A `BundleFilter` looks at the bundle itself, an `EventFilter` at the events
//! nested in it. A bundle passes the event filter when at least one of its
//! events matches every field that is set. Unset fields match anything, so the
//! default filters select every bundle. Selection never modifies a bundle.

use crate::types::{Event, RumBundle};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BundleFilter {
    pub url: Option<String>,
}

impl BundleFilter {
    pub fn with_url<U: Into<String>>(mut self, url: U) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.url.is_none()
    }

    pub fn matches(&self, bundle: &RumBundle) -> bool {
        self.url.as_deref().is_none_or(|url| bundle.url == url)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub checkpoint: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
}

impl EventFilter {
    pub fn for_checkpoint<C: Into<String>>(checkpoint: C) -> Self {
        EventFilter::default().with_checkpoint(checkpoint)
    }

    pub fn with_checkpoint<C: Into<String>>(mut self, checkpoint: C) -> Self {
        self.checkpoint = Some(checkpoint.into());
        self
    }

    pub fn with_source<S: Into<String>>(mut self, source: S) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_target<T: Into<String>>(mut self, target: T) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoint.is_none() && self.source.is_none() && self.target.is_none()
    }

    pub fn matches_event(&self, event: &Event) -> bool {
        field_matches(&self.checkpoint, &event.checkpoint)
            && field_matches(&self.source, &event.source)
            && field_matches(&self.target, &event.target)
    }

    pub fn matches(&self, bundle: &RumBundle) -> bool {
        self.is_empty() || bundle.events.iter().any(|event| self.matches_event(event))
    }
}

fn field_matches(expected: &Option<String>, actual: &str) -> bool {
    expected.as_deref().is_none_or(|expected| expected == actual)
}

/// Keeps the bundles matching both filters, in their original order.
pub fn apply<I>(
    bundles: I,
    bundle_filter: &BundleFilter,
    event_filter: &EventFilter,
) -> Vec<RumBundle>
where
    I: IntoIterator<Item = RumBundle>,
{
    bundles
        .into_iter()
        .filter(|bundle| bundle_filter.matches(bundle) && event_filter.matches(bundle))
        .collect()
}

/// Like [`apply`], but borrows the matching bundles instead of moving them.
pub fn select<'a>(
    bundles: &'a [RumBundle],
    bundle_filter: &BundleFilter,
    event_filter: &EventFilter,
) -> Vec<&'a RumBundle> {
    bundles
        .iter()
        .filter(|bundle| bundle_filter.matches(bundle) && event_filter.matches(bundle))
        .collect()
}
