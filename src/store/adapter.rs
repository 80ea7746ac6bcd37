//! Store capability trait for abstracting shared counter store backends.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Trait for shared counter store implementations.
///
/// This trait abstracts over the external atomic key-value store (in-memory,
/// Redis, or anything offering single-key atomic writes) so the bucket
/// engine can work with any of them. Implementations hold no business logic
/// and perform no retries; store unavailability surfaces as
/// [`LimiterError::StoreUnavailable`](crate::LimiterError::StoreUnavailable)
/// and retry policy belongs to the engine or caller.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the current stored value, or `None` if the key was never set
    /// (or has expired). Side-effect-free.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Atomically write `value` only if the stored value equals `expected`
    /// (`None` meaning the key is absent), refreshing its expiry to `ttl`.
    ///
    /// Returns `false` on mismatch, in which case no write was performed.
    /// This is the sole concurrency-control primitive the engine relies on.
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool>;

    /// Atomically create the key only if absent, with the given expiry.
    ///
    /// Returns whether creation happened. Used for idempotent namespace
    /// bootstrap: an existing key is left untouched.
    async fn initialize_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Remove a key, if present.
    async fn delete(&self, key: &str) -> Result<()>;
}
