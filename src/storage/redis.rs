//! Redis storage backend for distributed rate limiting.
//!
//! Uses connection pooling for high performance. Atomic operations run as
//! server-side Lua scripts, so any number of processes can share one key.

use std::time::Duration;

use deadpool_redis::redis::{cmd, AsyncCommands, RedisError};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, PoolError, Runtime, Timeouts};

use crate::error::{ConnectionError, RateLimitError, Result, StorageError};
use crate::storage::scripts::script_for;
use crate::storage::{AtomicOp, OpOutcome, Storage, StorageEntry};

/// Redis storage configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
    /// Key prefix for rate limit keys
    pub key_prefix: String,
    /// Connection timeout
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: "rl:".to_string(),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Create a new Redis configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the timeout for acquiring and creating connections.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// Redis storage backend for distributed rate limiting.
///
/// # Example
///
/// ```ignore
/// use admitgate::storage::{RedisStorage, RedisConfig};
///
/// let config = RedisConfig::new("redis://localhost:6379")
///     .with_prefix("myapp:rl:")
///     .with_pool_size(20);
///
/// let storage = RedisStorage::new(config).await?;
/// ```
pub struct RedisStorage {
    pool: Pool,
    key_prefix: String,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisStorage {
    /// Create a new Redis storage from configuration.
    ///
    /// Fails if the server does not answer a `PING`.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let mut timeouts = Timeouts::new();
        timeouts.wait = Some(config.connection_timeout);
        timeouts.create = Some(config.connection_timeout);
        timeouts.recycle = Some(config.connection_timeout);

        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts = timeouts;

        let mut cfg = Config::from_url(&config.url);
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        // Test connection
        let mut conn = pool
            .get()
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;
        let _: () = cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        tracing::info!(url = %config.url, pool_size = config.pool_size, "connected to redis");

        Ok(Self {
            pool,
            key_prefix: config.key_prefix,
        })
    }

    /// Create a new Redis storage from a URL.
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig::new(url)).await
    }

    /// Get the full key with prefix.
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> Result<Connection> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(_) => StorageError::PoolExhausted.into(),
            other => ConnectionError::ConnectionFailed(other.to_string()).into(),
        })
    }
}

/// Classify a command error.
fn command_error(e: RedisError) -> RateLimitError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        ConnectionError::ConnectionFailed(e.to_string()).into()
    } else {
        StorageError::operation_failed(e.to_string()).into()
    }
}

fn ttl_ms(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

impl Storage for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<StorageEntry>> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);

        let result: Option<String> = conn.get(&full_key).await.map_err(command_error)?;

        match result {
            Some(json) => {
                let entry: StorageEntry = serde_json::from_str(&json)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: StorageEntry, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);

        let json = serde_json::to_string(&entry)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        conn.pset_ex::<_, _, ()>(&full_key, json, ttl_ms(ttl))
            .await
            .map_err(command_error)?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);

        conn.del::<_, ()>(&full_key).await.map_err(command_error)?;

        Ok(())
    }

    async fn apply(&self, key: &str, op: AtomicOp, ttl: Duration) -> Result<OpOutcome> {
        let mut conn = self.get_conn().await?;
        let full_key = self.full_key(key);
        let ttl = ttl_ms(ttl);

        let mut invocation = script_for(&op).key(&full_key);
        match op {
            AtomicOp::Increment {
                window_start,
                limit,
                hits,
            } => {
                invocation.arg(window_start).arg(limit).arg(hits);
            }
            AtomicOp::WeightedIncrement {
                now,
                slot_ms,
                slots,
                limit,
                hits,
                mode,
            } => {
                invocation
                    .arg(now)
                    .arg(slot_ms)
                    .arg(slots)
                    .arg(limit)
                    .arg(hits)
                    .arg(mode.as_flag());
            }
            AtomicOp::PruneCountAppend {
                now,
                window_ms,
                limit,
                hits,
                mode,
            } => {
                invocation
                    .arg(now)
                    .arg(window_ms)
                    .arg(limit)
                    .arg(hits)
                    .arg(mode.as_flag());
            }
            AtomicOp::AdvanceTat {
                now,
                emission_us,
                tolerance_us,
                hits,
                mode,
            } => {
                invocation
                    .arg(now)
                    .arg(emission_us)
                    .arg(tolerance_us)
                    .arg(hits)
                    .arg(mode.as_flag());
            }
            AtomicOp::RefillAndTake {
                now,
                capacity,
                refill_rate,
                hits,
                mode,
            } => {
                invocation
                    .arg(now)
                    .arg(capacity)
                    .arg(refill_rate)
                    .arg(hits)
                    .arg(mode.as_flag());
            }
        }
        invocation.arg(ttl);

        let (allowed, json): (i64, String) = invocation
            .invoke_async(&mut *conn)
            .await
            .map_err(command_error)?;

        let entry: StorageEntry = serde_json::from_str(&json)
            .map_err(|e| StorageError::UnexpectedReply(format!("{}: {}", op.name(), e)))?;

        Ok(OpOutcome::new(allowed == 1, entry))
    }
}
