//! Replay-safe, TTL-bounded payload storage.
//!
//! A store maps an endpoint string to the verbatim encoded payload plus
//! the publisher timestamp it carried. Two rules make the mapping safe
//! against replay:
//!
//! - A put whose timestamp is less than or equal (truncated to
//!   microseconds) to the stored one is rejected without mutation.
//! - The TTL applied to a slot is never below [`MIN_RETENTION`]. A slot
//!   that outlives twice the submit window guarantees that a later valid
//!   put observes the previous timestamp instead of racing an emptied
//!   slot with a slightly older, still-in-window message.
//!
//! Two engines implement the contract: an in-memory map for tests and
//! single-node deployments, and Redis for anything shared.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use sigmap_payload::{MAX_SUBMIT_WINDOW, MAX_TTL};

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Floor applied to every stored entry's TTL: twice the submit window
/// plus a second, closing the replay window described in the module docs.
pub const MIN_RETENTION: Duration =
    Duration::from_secs(2 * MAX_SUBMIT_WINDOW.as_secs() + 1);

/// Errors returned by storage engines.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The put carried a timestamp at or before the stored one.
    #[error("storage: invalid timestamp")]
    StaleTimestamp,

    #[error("storage: key not found")]
    NotFound,

    #[error("storage: store is closed")]
    Closed,

    #[error("storage: invalid storage engine")]
    InvalidEngine,

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// The storage contract shared by every engine.
///
/// Puts are atomic per key; across keys no ordering is guaranteed. The
/// stored bytes are returned verbatim by `get`, so a payload read back
/// is byte-identical to the one submitted.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the stored bytes iff an unexpired entry exists.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Inserts or replaces the entry at `key`. An existing entry with a
    /// timestamp at or after `timestamp` (microsecond-truncated) fails
    /// with [`StorageError::StaleTimestamp`] and leaves the entry
    /// untouched. The applied TTL is `clamp(ttl, MIN_RETENTION, MAX_TTL)`.
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Removes the entry at `key` if present. Used by the read path to
    /// purge entries that no longer verify.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Releases resources. Further calls fail with [`StorageError::Closed`].
    async fn close(&self) -> Result<(), StorageError>;
}

/// Supported storage engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Memory,
    Redis,
}

impl FromStr for Engine {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, StorageError> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Engine::Memory),
            "redis" => Ok(Engine::Redis),
            _ => Err(StorageError::InvalidEngine),
        }
    }
}

/// Connection settings for [`new_store`]. Only the Redis engine reads
/// the endpoint, auth, and TLS fields.
#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub engine: Engine,
    pub endpoint: String,
    pub auth: Option<String>,
    pub tls: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            engine: Engine::Memory,
            endpoint: "127.0.0.1:6379".to_string(),
            auth: None,
            tls: false,
        }
    }
}

/// Builds the configured storage engine.
pub async fn new_store(opts: &StorageOptions) -> Result<Arc<dyn Store>, StorageError> {
    match opts.engine {
        Engine::Memory => Ok(Arc::new(MemoryStore::new())),
        Engine::Redis => Ok(Arc::new(RedisStore::connect(opts).await?)),
    }
}

/// Clamps a requested TTL into `[MIN_RETENTION, MAX_TTL]`.
pub(crate) fn effective_ttl(ttl: Duration) -> Duration {
    ttl.clamp(MIN_RETENTION, MAX_TTL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_names_parse() {
        assert_eq!(Engine::from_str("memory").unwrap(), Engine::Memory);
        assert_eq!(Engine::from_str("Redis").unwrap(), Engine::Redis);
        assert!(matches!(Engine::from_str("postgres"), Err(StorageError::InvalidEngine)));
    }

    #[test]
    fn effective_ttl_clamps_both_bounds() {
        assert_eq!(effective_ttl(Duration::ZERO), MIN_RETENTION);
        assert_eq!(effective_ttl(MIN_RETENTION - Duration::from_secs(1)), MIN_RETENTION);
        assert_eq!(effective_ttl(MAX_TTL + Duration::from_secs(30)), MAX_TTL);
        let plain = Duration::from_secs(60);
        assert_eq!(effective_ttl(plain), plain);
    }

    #[tokio::test]
    async fn factory_builds_the_memory_engine() {
        let store = new_store(&StorageOptions::default()).await.unwrap();
        assert!(matches!(store.get("absent").await, Err(StorageError::NotFound)));
    }
}
