//! Shared counter store adapters.
//!
//! The engine performs every state transition through the [`CounterStore`]
//! capability trait, so any key-value store offering an atomic single-key
//! compare-and-set (or a scripted transaction) can back a bucket.

mod adapter;
mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use adapter::CounterStore;
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis::RedisStore;
