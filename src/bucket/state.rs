//! Stored bucket state and the refill projection.

use serde::{Deserialize, Serialize};

/// The authoritative state of one bucket, as stored in the shared store.
///
/// The engine is stateless between calls; this tuple is the single shared
/// mutable resource, and it is never read-modify-written without a
/// compare-and-set guard on the raw encoded value observed at read time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Current token count, `0 <= tokens <= burst`
    pub tokens: f64,
    /// Unix timestamp (seconds) of the last time `tokens` was recomputed
    pub last_refill_at: f64,
}

impl BucketState {
    /// A freshly created bucket: full, refilled now.
    pub fn full(burst: u64, now: f64) -> Self {
        Self {
            tokens: burst as f64,
            last_refill_at: now,
        }
    }

    /// Project the token count forward to `now` without consuming anything.
    ///
    /// Elapsed time is clamped to zero so a reader with a clock behind the
    /// last writer never computes a negative refill. The count is recomputed
    /// fresh from wall-clock time on every call rather than accumulated
    /// incrementally, so repeated small refills cannot drift.
    pub fn refilled(&self, rate: f64, burst: u64, now: f64) -> f64 {
        let elapsed = (now - self.last_refill_at).max(0.0);
        (self.tokens + elapsed * rate).min(burst as f64)
    }

    /// Encode for storage, compactly.
    pub fn encode(&self) -> String {
        // Two finite floats; serialization cannot fail
        serde_json::to_string(self).unwrap()
    }

    /// Decode a stored value.
    ///
    /// Returns `None` for an undecodable value. The engine treats that like
    /// an absent key and writes a fresh full state over it, so one corrupt
    /// write cannot wedge a bucket behind permanent errors.
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}
