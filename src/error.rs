//! Error types for the Tokenfield limiter.

use thiserror::Error;

/// Main error type for limiter operations.
///
/// `StoreUnavailable` and `Contended` are surfaced unchanged to the caller:
/// neither is ever converted into a "denied" decision, so integrating
/// applications can distinguish "rate limited" from "limiter unavailable"
/// and apply their own fail-open or fail-closed policy.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// The shared counter store could not be reached or timed out.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The compare-and-set retry loop exceeded its attempt budget under
    /// concurrent contention on the same bucket key.
    #[error("Bucket '{bucket}' contended after {attempts} attempts")]
    Contended {
        /// Name of the contended bucket
        bucket: String,
        /// Number of compare-and-set attempts made before giving up
        attempts: u32,
    },

    /// Non-positive rate or burst, or a cost that could never succeed.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
