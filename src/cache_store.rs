//! TTL-aware key-value store used to share schema snapshots between instances.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::CacheStoreError;

/// Expiry policy of a `SET`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetTtl {
    /// Expire after the given duration (`PX`)
    Px(Duration),
    /// Keep whatever expiry the key already has (`KEEPTTL`)
    KeepTtl,
}

/// Result of a `PTTL`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Missing,
    Persistent,
    Remaining(Duration),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError>;

    async fn set(&self, key: &str, value: String, ttl: SetTtl) -> Result<(), CacheStoreError>;

    async fn pttl(&self, key: &str) -> Result<Ttl, CacheStoreError>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Process-local store, same semantics as the Redis commands it mirrors
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: SetTtl) -> Result<(), CacheStoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expires_at = match ttl {
            SetTtl::Px(duration) => Some(now + duration),
            // KEEPTTL on an expired or missing key creates a persistent one
            SetTtl::KeepTtl => entries
                .get(key)
                .filter(|entry| entry.is_live(now))
                .and_then(|entry| entry.expires_at),
        };
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn pttl(&self, key: &str) -> Result<Ttl, CacheStoreError> {
        let now = Instant::now();
        let entries = self.entries.lock();
        Ok(match entries.get(key) {
            Some(entry) if entry.is_live(now) => match entry.expires_at {
                Some(at) => Ttl::Remaining(at - now),
                None => Ttl::Persistent,
            },
            _ => Ttl::Missing,
        })
    }
}
