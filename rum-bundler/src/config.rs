use crate::retry::RetryPolicy;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://rum.fastly-aem.page";
pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("batch_size cannot be 0")]
    InvalidBatchSize,

    #[error("retry.max_attempts cannot be 0")]
    InvalidMaxAttempts,

    #[error("base_url cannot be used as a base: {0}")]
    InvalidBaseUrl(String),
}

/// Settings for talking to the RUM bundle API.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RumConfig {
    /// Root of the bundle and domain key endpoints
    pub base_url: Url,
    /// Number of endpoints requested concurrently
    pub batch_size: usize,
    /// Per request timeout. Unset leaves the HTTP client default in place.
    pub request_timeout_secs: Option<u64>,
    pub retry: RetryPolicy,
}

impl Default for RumConfig {
    fn default() -> Self {
        RumConfig {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            batch_size: DEFAULT_BATCH_SIZE,
            request_timeout_secs: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl RumConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::InvalidBatchSize);
        }
        if self.retry.max_attempts == Some(0) {
            return Err(ValidationError::InvalidMaxAttempts);
        }
        if self.base_url.cannot_be_a_base() {
            return Err(ValidationError::InvalidBaseUrl(self.base_url.to_string()));
        }
        Ok(())
    }
}
