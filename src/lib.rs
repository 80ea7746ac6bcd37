//! Tokenfield - Distributed Token-Bucket Rate Limiting
//!
//! This crate implements a token-bucket rate limiter whose authoritative
//! state lives in a shared counter store, so many uncoordinated callers
//! (processes, servers, request handlers) enforce one logical quota without
//! any in-process view of each other. Correctness under concurrency comes
//! entirely from the store's atomic compare-and-set primitive: every
//! refill/consume transition is applied as a bounded optimistic retry loop,
//! never through distributed locking.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokenfield::{bucket, BucketConfig, MemoryStore};
//!
//! # async fn example() -> tokenfield::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let limiter = bucket("api-calls", BucketConfig::default(), store).await?;
//!
//! let decision = limiter.acquire(1).await?;
//! if !decision.allowed {
//!     // map to the application's "too many requests" path
//! }
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod config;
pub mod error;
pub mod store;

use std::sync::Arc;

pub use bucket::{Bucket, BucketState, Decision};
pub use config::{BucketConfig, DEFAULT_NAMESPACE_PREFIX};
pub use error::{LimiterError, Result};
#[cfg(feature = "redis")]
pub use store::RedisStore;
pub use store::{CounterStore, MemoryStore};

/// Build a [`Bucket`] and run its idempotent namespace initialization.
///
/// Convenience for the common construct-then-initialize sequence; an
/// already-initialized bucket keeps its in-use token count.
pub async fn bucket(
    name: impl Into<String>,
    config: BucketConfig,
    store: Arc<dyn CounterStore>,
) -> Result<Bucket> {
    let bucket = Bucket::new(name, config, store)?;
    bucket.initialize_namespace().await?;
    Ok(bucket)
}
