//! Redis storage engine.
//!
//! Each endpoint maps to a JSON record `{"payload": <base64>,
//! "timestamp": <unix nanos>}` written with `EX`, so Redis itself
//! enforces the TTL. The put runs as a Lua script: read the existing
//! record, compare microsecond-truncated timestamps, and conditionally
//! `SET`. The script executes atomically on the server, which makes the
//! compare-and-set linearizable per key without client-side locking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde::{Deserialize, Serialize};

use crate::{effective_ttl, StorageError, StorageOptions, Store};

/// Candidate timestamps arrive pre-truncated to microseconds (ARGV[2]);
/// the stored nanosecond value is truncated inside the script. A stale
/// candidate returns "STALE" without touching the key.
const CAS_SCRIPT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
  local current = cjson.decode(redis.call("GET", KEYS[1]))
  if math.floor(tonumber(current["timestamp"]) / 1000) >= tonumber(ARGV[2]) then
    return "STALE"
  end
end
redis.call("SET", KEYS[1], ARGV[1], "EX", ARGV[3])
return "OK"
"#;

#[derive(Serialize, Deserialize)]
struct RedisVal {
    payload: String,
    timestamp: i64,
}

/// Redis-backed [`Store`] implementation.
pub struct RedisStore {
    conn: ConnectionManager,
    script: Script,
    closed: AtomicBool,
}

impl RedisStore {
    /// Connects to the endpoint in `opts`, weaving in auth and TLS
    /// (`rediss://`) when configured.
    pub async fn connect(opts: &StorageOptions) -> Result<Self, StorageError> {
        let url = connection_url(opts);
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn, script: Script::new(CAS_SCRIPT), closed: AtomicBool::new(false) })
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

fn connection_url(opts: &StorageOptions) -> String {
    let scheme = if opts.tls { "rediss" } else { "redis" };
    match &opts.auth {
        Some(auth) => format!("{}://:{}@{}", scheme, auth, opts.endpoint),
        None => format!("{}://{}", scheme, opts.endpoint),
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.check_open()?;
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        let raw = raw.ok_or(StorageError::NotFound)?;
        let record: RedisVal = serde_json::from_str(&raw)
            .map_err(|e| StorageError::Backend(format!("malformed record: {}", e)))?;
        BASE64
            .decode(record.payload)
            .map_err(|e| StorageError::Backend(format!("malformed record payload: {}", e)))
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.check_open()?;
        let record = RedisVal {
            payload: BASE64.encode(&value),
            timestamp: timestamp.timestamp_nanos_opt().unwrap_or_default(),
        };
        let record = serde_json::to_string(&record)
            .map_err(|e| StorageError::Backend(format!("record encoding failed: {}", e)))?;

        let mut conn = self.conn.clone();
        let reply: String = self
            .script
            .key(key)
            .arg(record)
            .arg(timestamp.timestamp_micros())
            .arg(effective_ttl(ttl).as_secs())
            .invoke_async(&mut conn)
            .await?;
        match reply.as_str() {
            "OK" => Ok(()),
            "STALE" => Err(StorageError::StaleTimestamp),
            other => Err(StorageError::Backend(format!("unexpected script reply: {}", other))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_open()?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.check_open()?;
        // The connection manager has no explicit shutdown; refusing
        // further calls is what the contract requires.
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// These tests need a running Redis instance:
// docker run -d -p 6379:6379 redis:7
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Engine, MIN_RETENTION};
    use chrono::Duration as ChronoDuration;
    use serial_test::serial;

    async fn test_store() -> RedisStore {
        let endpoint = std::env::var("REDIS_ENDPOINT")
            .unwrap_or_else(|_| "127.0.0.1:6379".to_string());
        let opts = StorageOptions { engine: Engine::Redis, endpoint, auth: None, tls: false };
        RedisStore::connect(&opts).await.expect("redis should be reachable")
    }

    #[test]
    fn connection_urls_carry_auth_and_tls() {
        let mut opts = StorageOptions {
            engine: Engine::Redis,
            endpoint: "example.com:6380".to_string(),
            auth: None,
            tls: false,
        };
        assert_eq!(connection_url(&opts), "redis://example.com:6380");

        opts.auth = Some("secret".to_string());
        opts.tls = true;
        assert_eq!(connection_url(&opts), "rediss://:secret@example.com:6380");
    }

    #[tokio::test]
    #[serial]
    #[ignore] // Requires Redis
    async fn set_get_round_trip() {
        let store = test_store().await;
        let key = "sigmap:test:roundtrip";
        store.delete(key).await.unwrap();

        let value = b"hello, world".to_vec();
        store.put(key, value.clone(), Duration::from_secs(30), Utc::now()).await.unwrap();
        assert_eq!(store.get(key).await.unwrap(), value);

        store.delete(key).await.unwrap();
        assert!(matches!(store.get(key).await, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    #[serial]
    #[ignore] // Requires Redis
    async fn replayed_timestamps_are_rejected() {
        let store = test_store().await;
        let key = "sigmap:test:replay";
        store.delete(key).await.unwrap();

        let now = Utc::now();
        store.put(key, b"v1".to_vec(), Duration::from_secs(30), now).await.unwrap();

        let older = now - ChronoDuration::microseconds(1);
        assert!(matches!(
            store.put(key, b"v2".to_vec(), Duration::from_secs(30), older).await,
            Err(StorageError::StaleTimestamp)
        ));
        assert_eq!(store.get(key).await.unwrap(), b"v1");

        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    #[serial]
    #[ignore] // Requires Redis
    async fn short_ttls_respect_the_retention_floor() {
        let store = test_store().await;
        let key = "sigmap:test:floor";
        store.delete(key).await.unwrap();

        store.put(key, b"v1".to_vec(), Duration::ZERO, Utc::now()).await.unwrap();
        let mut conn = store.conn.clone();
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await.unwrap();
        assert!(ttl > 0 && ttl as u64 <= MIN_RETENTION.as_secs());

        store.delete(key).await.unwrap();
    }

    #[tokio::test]
    #[serial]
    #[ignore] // Requires Redis
    async fn malformed_records_surface_as_backend_errors() {
        let store = test_store().await;
        let key = "sigmap:test:malformed";
        let mut conn = store.conn.clone();
        let _: () = conn.set(key, "not json").await.unwrap();

        assert!(matches!(store.get(key).await, Err(StorageError::Backend(_))));
        store.delete(key).await.unwrap();
    }
}
