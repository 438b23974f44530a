//! In-memory storage engine.
//!
//! A reader/writer-locked map of endpoint to `(bytes, timestamp,
//! expiry)`. Every successful put spawns a timer task that deletes the
//! entry when its TTL elapses, but only if the stored bytes still equal
//! the bytes that were put, so a late timer can never purge a fresher
//! entry. Reads also check the expiry directly, which keeps the
//! contract exact even while a timer is still pending.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};

use crate::{effective_ttl, StorageError, Store};

struct MemVal {
    payload: Vec<u8>,
    timestamp: DateTime<Utc>,
    expires_at: Instant,
}

/// In-memory [`Store`] implementation.
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, MemVal>>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())), closed: AtomicBool::new(false) }
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Deletes `key` iff the stored bytes still equal `value`.
async fn delete_if_value_match(
    inner: &RwLock<HashMap<String, MemVal>>,
    key: &str,
    value: &[u8],
) {
    let mut guard = inner.write().await;
    if guard.get(key).is_some_and(|v| v.payload == value) {
        guard.remove(key);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.check_open()?;
        let guard = self.inner.read().await;
        match guard.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => Ok(entry.payload.clone()),
            _ => Err(StorageError::NotFound),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.check_open()?;
        let ttl = effective_ttl(ttl);
        {
            let mut guard = self.inner.write().await;
            if let Some(existing) = guard.get(key) {
                if existing.timestamp.timestamp_micros() >= timestamp.timestamp_micros() {
                    return Err(StorageError::StaleTimestamp);
                }
            }
            guard.insert(
                key.to_string(),
                MemVal {
                    payload: value.clone(),
                    timestamp,
                    expires_at: Instant::now() + ttl,
                },
            );
        }

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        tokio::spawn(async move {
            sleep(ttl).await;
            delete_if_value_match(&inner, &key, &value).await;
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_open()?;
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.check_open()?;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
