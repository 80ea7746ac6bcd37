//! Configuration for a token bucket.

use serde::{Deserialize, Serialize};

use crate::error::{LimiterError, Result};

/// Default key prefix scoping all limiter keys in the shared store.
pub const DEFAULT_NAMESPACE_PREFIX: &str = "tokenfield";

/// Configuration for a single token bucket.
///
/// `rate` and `burst` are immutable for the lifetime of a bucket instance;
/// changing them requires a differently-named bucket or an explicit reset of
/// the stored state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Tokens added per second
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Maximum token count the bucket can hold
    #[serde(default = "default_burst")]
    pub burst: u64,

    /// Key prefix scoping this bucket's keys in the shared store
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            burst: default_burst(),
            namespace_prefix: default_namespace_prefix(),
        }
    }
}

fn default_rate() -> f64 {
    5.0
}

fn default_burst() -> u64 {
    10
}

fn default_namespace_prefix() -> String {
    DEFAULT_NAMESPACE_PREFIX.to_string()
}

impl BucketConfig {
    /// Validate the configuration.
    ///
    /// Invalid values are rejected here rather than silently clamped.
    pub fn validate(&self) -> Result<()> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(LimiterError::InvalidConfiguration(format!(
                "rate must be a positive number, got {}",
                self.rate
            )));
        }
        if self.burst == 0 {
            return Err(LimiterError::InvalidConfiguration(
                "burst must be at least 1".to_string(),
            ));
        }
        if self.namespace_prefix.is_empty() {
            return Err(LimiterError::InvalidConfiguration(
                "namespace_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
