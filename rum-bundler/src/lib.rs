//! Retrieval and aggregation of RUM bundles into experiment insights.
//!
//! `BundleFetcher` pulls bundles for a domain over a trailing window,
//! `filter` narrows them, and `InsightAggregator` folds the experiment
//! bundles into an `InsightReport`. `collect_insights` runs all three.

pub mod config;
pub mod domain_key;
pub mod fetcher;
pub mod filter;
pub mod insights;
pub mod metrics_defs;
pub mod retry;
pub mod types;

#[cfg(test)]
mod testutils;

use std::collections::HashSet;

pub use domain_key::{DomainKey, DomainKeyProvider, DomainKeyResolver};
pub use fetcher::{BundleFetcher, BundleSource, FetchError, HttpBundleSource};
pub use filter::{BundleFilter, EventFilter};
pub use insights::{ExperimentInsight, InsightAggregator, InsightReport, VariantInsight};
pub use retry::RetryPolicy;
pub use types::{Event, Granularity, RumBundle, TimeWindow, checkpoint};

/// Parameters of one insights run.
#[derive(Clone, Debug)]
pub struct InsightRequest {
    pub domain: String,
    pub window: TimeWindow,
    pub domain_key: Option<DomainKey>,
    /// Restricts the report to a single page URL
    pub page_url: Option<String>,
}

impl InsightRequest {
    pub fn new<D: Into<String>>(domain: D, window: TimeWindow) -> Self {
        InsightRequest {
            domain: domain.into(),
            window,
            domain_key: None,
            page_url: None,
        }
    }
}

/// Fetches the window, keeps the bundles carrying an experiment assignment
/// (on `page_url` if given) and aggregates them.
///
/// Only the checkpoints the aggregator reads are kept in memory while
/// fetching.
pub async fn collect_insights(
    fetcher: &BundleFetcher,
    aggregator: &InsightAggregator,
    request: InsightRequest,
) -> Result<InsightReport, FetchError> {
    let checkpoints: HashSet<String> = [
        checkpoint::EXPERIMENT,
        aggregator.click_checkpoint(),
        aggregator.conversion_checkpoint(),
    ]
    .into_iter()
    .map(String::from)
    .collect();

    let bundles = fetcher
        .fetch(
            &request.domain,
            &request.window,
            request.domain_key,
            Some(&checkpoints),
        )
        .await?;

    let bundle_filter = match request.page_url {
        Some(url) => BundleFilter::default().with_url(url),
        None => BundleFilter::default(),
    };
    let experiments = filter::select(
        &bundles,
        &bundle_filter,
        &EventFilter::for_checkpoint(checkpoint::EXPERIMENT),
    );
    tracing::debug!(
        fetched = bundles.len(),
        selected = experiments.len(),
        "Selected experiment bundles"
    );

    let report = aggregator.aggregate(experiments);
    let variants = || {
        report
            .pages()
            .flat_map(|(_, page)| page.experiments())
            .flat_map(ExperimentInsight::variants)
    };
    tracing::info!(
        domain = %request.domain,
        pages = report.pages().count(),
        experiments = report.experiment_count(),
        views = report.total_views(),
        clicks = variants().map(VariantInsight::total_clicks).sum::<u64>(),
        conversions = variants().map(VariantInsight::total_conversions).sum::<u64>(),
        "Aggregated experiment insights"
    );

    Ok(report)
}
