pub mod metrics_defs;

// Re-exported so the metric macros resolve from any crate in the workspace.
pub use metrics;
