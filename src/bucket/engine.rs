//! Core token bucket engine.
//!
//! Every state transition goes through the shared counter store as a
//! bounded compare-and-set retry loop (optimistic concurrency), chosen over
//! a distributed lock because lock acquisition and release would double the
//! network round-trips per call.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, trace, warn};

use super::state::BucketState;
use crate::config::BucketConfig;
use crate::error::{LimiterError, Result};
use crate::store::CounterStore;

/// Maximum compare-and-set attempts before surfacing `Contended`.
const MAX_CAS_ATTEMPTS: u32 = 8;

/// Stored keys outlive a full refill from empty by this factor, so an
/// active bucket is never evicted mid-life while abandoned ones are
/// eventually reclaimed.
const TTL_REFILL_MULTIPLIER: f64 = 10.0;

/// Floor on the stored key TTL.
const MIN_TTL: Duration = Duration::from_secs(60);

/// Cap on the stored key TTL. A bucket that takes longer than this to
/// refill from empty is effectively a static quota; its key still expires
/// once wholly abandoned.
const MAX_TTL: Duration = Duration::from_secs(30 * 86_400);

/// Comparison slack for fractional token counts.
const TOKEN_EPSILON: f64 = 1e-9;

/// The outcome of an [`Bucket::acquire`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Whether the requested cost was granted
    pub allowed: bool,
    /// Token count left in the bucket after this call's refill projection
    /// and any charge. A denied call is not charged, so this reflects the
    /// refilled count unchanged.
    pub remaining: f64,
}

/// A token bucket bound to one name in the shared store.
///
/// The engine holds no mutable state of its own: the authoritative
/// `(tokens, last_refill_at)` tuple lives in the store, so any number of
/// `Bucket` instances across processes and machines acting on the same name
/// observe and mutate one shared quota. Instances are cheap to construct
/// per call.
pub struct Bucket {
    name: String,
    config: BucketConfig,
    store: Arc<dyn CounterStore>,
    key: String,
    ttl: Duration,
}

impl Bucket {
    /// Create an engine bound to `name`, validating the configuration.
    pub fn new(
        name: impl Into<String>,
        config: BucketConfig,
        store: Arc<dyn CounterStore>,
    ) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        let key = format!("{}:{}", config.namespace_prefix, name);
        let ttl = Self::ttl_for(&config);
        Ok(Self {
            name,
            config,
            store,
            key,
            ttl,
        })
    }

    /// The bucket name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The key this bucket occupies in the shared store.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Expiry applied to the stored key on every write.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn ttl_for(config: &BucketConfig) -> Duration {
        let full_refill_secs = config.burst as f64 / config.rate;
        // Clamping also absorbs an infinite product from an extreme
        // burst/rate ratio, which would panic Duration::from_secs_f64
        let secs = (full_refill_secs * TTL_REFILL_MULTIPLIER)
            .clamp(MIN_TTL.as_secs_f64(), MAX_TTL.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    fn unix_now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs_f64()
    }

    /// Create the bucket's stored state if it does not exist yet.
    ///
    /// Idempotent and safe to call concurrently from multiple processes: if
    /// the key already exists (created by a concurrent caller or a prior
    /// run) this is a no-op and the in-use token count is left intact.
    pub async fn initialize_namespace(&self) -> Result<()> {
        let initial = BucketState::full(self.config.burst, Self::unix_now());
        let created = self
            .store
            .initialize_if_absent(&self.key, &initial.encode(), self.ttl)
            .await?;
        if created {
            debug!(
                key = %self.key,
                burst = self.config.burst,
                "Initialized bucket state"
            );
        }
        Ok(())
    }

    /// Try to take `cost` tokens, reading the wall clock for the refill.
    pub async fn acquire(&self, cost: u64) -> Result<Decision> {
        self.acquire_at(cost, Self::unix_now()).await
    }

    /// Try to take `cost` tokens as of `now` (unix seconds).
    ///
    /// Reads the stored tuple, projects the refill forward, and applies the
    /// decision with a compare-and-set on the raw value observed at read
    /// time. A concurrent writer fails the compare-and-set and the loop
    /// restarts from a fresh read, so no update is ever lost and no token
    /// is spent twice. The loop is bounded: once the attempt budget is
    /// exhausted the call surfaces [`LimiterError::Contended`] rather than
    /// spinning, and a denied request is never charged.
    pub async fn acquire_at(&self, cost: u64, now: f64) -> Result<Decision> {
        if cost > self.config.burst {
            return Err(LimiterError::InvalidConfiguration(format!(
                "cost {} exceeds burst {} and could never succeed",
                cost, self.config.burst
            )));
        }

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let observed = self.store.get(&self.key).await?;
            // Lazy self-initialization: an absent key is a full bucket, and
            // so is an undecodable one (the compare-and-set below replaces
            // the corrupt value with a fresh state)
            let state = match observed.as_deref() {
                Some(raw) => BucketState::decode(raw).unwrap_or_else(|| {
                    warn!(key = %self.key, "Replacing undecodable bucket state");
                    BucketState::full(self.config.burst, now)
                }),
                None => BucketState::full(self.config.burst, now),
            };

            let refilled = state.refilled(self.config.rate, self.config.burst, now);
            let allowed = refilled + TOKEN_EPSILON >= cost as f64;
            let remaining = if allowed {
                (refilled - cost as f64).max(0.0)
            } else {
                refilled
            };

            let next = BucketState {
                tokens: remaining,
                last_refill_at: now,
            };
            let applied = self
                .store
                .compare_and_set(&self.key, observed.as_deref(), &next.encode(), self.ttl)
                .await?;
            if !applied {
                trace!(
                    key = %self.key,
                    attempt = attempt,
                    "Concurrent update detected, retrying"
                );
                // Let the competing writer finish before re-reading
                tokio::task::yield_now().await;
                continue;
            }

            if !allowed {
                debug!(
                    key = %self.key,
                    cost = cost,
                    remaining = remaining,
                    "Acquire denied"
                );
            }
            return Ok(Decision { allowed, remaining });
        }

        Err(LimiterError::Contended {
            bucket: self.name.clone(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Project the current token count as of the wall clock, without writing.
    pub async fn remaining(&self) -> Result<f64> {
        self.remaining_at(Self::unix_now()).await
    }

    /// Project the token count as of `now` (unix seconds). Read-only, safe
    /// to call at any frequency.
    pub async fn remaining_at(&self, now: f64) -> Result<f64> {
        let state = match self.store.get(&self.key).await?.as_deref() {
            // An undecodable value reads as absent, matching acquire
            Some(raw) => match BucketState::decode(raw) {
                Some(state) => state,
                None => return Ok(self.config.burst as f64),
            },
            None => return Ok(self.config.burst as f64),
        };
        Ok(state.refilled(self.config.rate, self.config.burst, now))
    }

    /// Remove the bucket's stored state.
    ///
    /// The next `acquire` starts over from a full bucket. This is the
    /// explicit reset required before reusing a name with a different rate
    /// or burst.
    pub async fn reset(&self) -> Result<()> {
        self.store.delete(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const NOW: f64 = 1_700_000_000.0;

    fn test_bucket(rate: f64, burst: u64) -> Bucket {
        let config = BucketConfig {
            rate,
            burst,
            ..Default::default()
        };
        Bucket::new("test", config, Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = BucketConfig {
            rate: 0.0,
            ..Default::default()
        };
        let result = Bucket::new("test", config, Arc::new(MemoryStore::new()));
        assert!(matches!(
            result,
            Err(LimiterError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_key_derivation() {
        let bucket = test_bucket(5.0, 10);
        assert_eq!(bucket.key(), "tokenfield:test");
    }

    #[test]
    fn test_ttl_exceeds_full_refill_time() {
        // Full refill is 2s; the floor dominates
        assert_eq!(test_bucket(5.0, 10).ttl(), Duration::from_secs(60));
        // Full refill is 1000s; the multiplier dominates
        assert_eq!(test_bucket(1.0, 1000).ttl(), Duration::from_secs(10_000));
    }

    #[test]
    fn test_ttl_capped_for_extreme_refill_times() {
        // A full refill of 1e20 seconds must construct, not panic
        let bucket = test_bucket(0.01, 1_000_000_000_000_000_000);
        assert_eq!(bucket.ttl(), Duration::from_secs(30 * 86_400));

        // Even a ratio that overflows f64 to infinity is clamped
        let bucket = test_bucket(f64::MIN_POSITIVE, u64::MAX);
        assert_eq!(bucket.ttl(), Duration::from_secs(30 * 86_400));
    }

    #[tokio::test]
    async fn test_acquire_lazily_initializes_full() {
        let bucket = test_bucket(5.0, 10);

        let decision = bucket.acquire_at(3, NOW).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 7.0);
    }

    #[tokio::test]
    async fn test_acquire_denies_without_charging() {
        let bucket = test_bucket(5.0, 10);
        bucket.acquire_at(8, NOW).await.unwrap();

        let denied = bucket.acquire_at(8, NOW).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 2.0);
        assert_eq!(bucket.remaining_at(NOW).await.unwrap(), 2.0);
    }

    #[tokio::test]
    async fn test_cost_above_burst_rejected() {
        let bucket = test_bucket(5.0, 10);
        assert!(matches!(
            bucket.acquire_at(11, NOW).await,
            Err(LimiterError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_zero_cost_always_allowed() {
        let bucket = test_bucket(5.0, 1);
        bucket.acquire_at(1, NOW).await.unwrap();

        let decision = bucket.acquire_at(0, NOW).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0.0);
    }

    #[tokio::test]
    async fn test_remaining_is_read_only() {
        let bucket = test_bucket(5.0, 10);
        bucket.acquire_at(10, NOW).await.unwrap();

        // Projection a second later sees the refill without writing it back
        assert_eq!(bucket.remaining_at(NOW + 1.0).await.unwrap(), 5.0);
        assert_eq!(bucket.remaining_at(NOW + 1.0).await.unwrap(), 5.0);

        // The stored state still refers to the original drain
        let decision = bucket.acquire_at(5, NOW + 1.0).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 0.0);
    }

    #[tokio::test]
    async fn test_remaining_on_missing_key_reports_full() {
        let bucket = test_bucket(5.0, 10);
        assert_eq!(bucket.remaining_at(NOW).await.unwrap(), 10.0);
    }

    #[tokio::test]
    async fn test_reset_refills() {
        let bucket = test_bucket(5.0, 10);
        bucket.acquire_at(10, NOW).await.unwrap();
        assert_eq!(bucket.remaining_at(NOW).await.unwrap(), 0.0);

        bucket.reset().await.unwrap();
        assert_eq!(bucket.remaining_at(NOW).await.unwrap(), 10.0);
    }

    #[tokio::test]
    async fn test_corrupt_stored_state_reads_as_absent_and_heals() {
        let store = Arc::new(MemoryStore::new());
        let config = BucketConfig {
            rate: 5.0,
            burst: 10,
            ..Default::default()
        };
        let bucket = Bucket::new("test", config, store.clone()).unwrap();
        store
            .compare_and_set(bucket.key(), None, "not json", Duration::from_secs(60))
            .await
            .unwrap();

        // A corrupt value is not a permanent error: it reads as a full
        // bucket, and the first acquire writes a fresh state over it
        assert_eq!(bucket.remaining_at(NOW).await.unwrap(), 10.0);
        let decision = bucket.acquire_at(4, NOW).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 6.0);
        assert_eq!(bucket.remaining_at(NOW).await.unwrap(), 6.0);
    }

    #[tokio::test]
    async fn test_fractional_refill_has_no_drift() {
        let bucket = test_bucket(0.1, 10);
        bucket.acquire_at(10, NOW).await.unwrap();

        // 10_000 projections over 100s accumulate nothing; the projection
        // is recomputed fresh from elapsed time each call
        for i in 0..10_000 {
            let now = NOW + (i as f64) * 0.01;
            let _ = bucket.remaining_at(now).await.unwrap();
        }
        assert_eq!(bucket.remaining_at(NOW + 100.0).await.unwrap(), 10.0);
    }
}
