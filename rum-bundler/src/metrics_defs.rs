//! Metrics definitions for bundle retrieval.

use shared::metrics_defs::{MetricDef, MetricType};

pub const FETCH_BUNDLES: MetricDef = MetricDef {
    name: "fetch.bundles",
    metric_type: MetricType::Counter,
    description: "Number of RUM bundles retrieved across all endpoints",
};

pub const FETCH_BATCH_RETRIES: MetricDef = MetricDef {
    name: "fetch.batch.retries",
    metric_type: MetricType::Counter,
    description: "Number of times a failed endpoint batch was scheduled again",
};

pub const FETCH_BATCH_DURATION: MetricDef = MetricDef {
    name: "fetch.batch.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete one endpoint batch in seconds, retries included",
};

pub const DOMAIN_KEY_UNRESOLVED: MetricDef = MetricDef {
    name: "domain_key.unresolved",
    metric_type: MetricType::Counter,
    description: "Number of domain key lookups that fell back to no key",
};

pub const ALL_METRICS: &[MetricDef] = &[
    FETCH_BUNDLES,
    FETCH_BATCH_RETRIES,
    FETCH_BATCH_DURATION,
    DOMAIN_KEY_UNRESOLVED,
];
