//! Redis-backed counter store implementation.
//!
//! Both multi-step operations run as Lua scripts, so each is a single
//! atomic step on the Redis server regardless of how many limiter
//! processes share the instance.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};

use super::adapter::CounterStore;
use crate::error::{LimiterError, Result};

/// Default endpoint when no connection string is supplied.
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Environment variable holding the Redis connection string.
const REDIS_URL_ENV: &str = "REDIS_URL";

const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
  if current ~= false then return 0 end
else
  if current ~= ARGV[2] then return 0 end
end
redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
return 1
"#;

const INIT_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
return 1
"#;

/// A counter store backed by a shared Redis instance.
pub struct RedisStore {
    connection: MultiplexedConnection,
    cas_script: Script,
    init_script: Script,
}

impl RedisStore {
    /// Connect to Redis at the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(store_unavailable)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_unavailable)?;
        Ok(Self {
            connection,
            cas_script: Script::new(CAS_SCRIPT),
            init_script: Script::new(INIT_SCRIPT),
        })
    }

    /// Connect using the `REDIS_URL` environment variable if present, else
    /// the local default endpoint.
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var(REDIS_URL_ENV).unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
        Self::connect(&url).await
    }
}

fn store_unavailable(e: redis::RedisError) -> LimiterError {
    LimiterError::StoreUnavailable(e.to_string())
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX rejects 0
    ttl.as_millis().max(1) as u64
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_unavailable)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.connection.clone();
        let applied: i64 = self
            .cas_script
            .key(key)
            .arg(if expected.is_none() { "1" } else { "0" })
            .arg(expected.unwrap_or(""))
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(store_unavailable)?;
        Ok(applied == 1)
    }

    async fn initialize_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        let created: i64 = self
            .init_script
            .key(key)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(store_unavailable)?;
        Ok(created == 1)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(store_unavailable)
    }
}
