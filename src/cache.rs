//! Bounded TTL cache for forecast results over a [`KvStore`].
//!
//! Entries live under `forecast_cache_<key>` as JSON `{data, timestamp, key}`;
//! a JSON array under `forecast_cache_index` records resident keys in
//! insertion order. Expiry is lazy (checked on `get`) and eviction is FIFO by
//! insertion, not by access. The cache is best-effort: every store failure is
//! logged and swallowed, and a full store clears the whole cache.

use crate::clock::{Clock, SystemClock, duration_millis};
use crate::store::{KvStore, StoreError};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CACHE_KEY_PREFIX: &str = "forecast_cache_";
pub const INDEX_KEY: &str = "forecast_cache_index";

const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_MAX_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Age after which an entry is stale.
    pub ttl: Duration,
    /// Maximum number of distinct keys retained.
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

/// Persisted form of one cached result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// Epoch milliseconds of the most recent `set`.
    pub timestamp: i64,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntryStats {
    pub key: String,
    /// Milliseconds since the entry was written.
    pub age: i64,
    /// Length of the serialized entry.
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub entries: Vec<CacheEntryStats>,
}

pub struct ForecastCache {
    store: Arc<dyn KvStore>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    /// Serializes index read-modify-write sequences.
    index_lock: Mutex<()>,
}

impl ForecastCache {
    pub fn new(store: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KvStore>, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
            index_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Cached payload for `key` if present and fresh.
    ///
    /// A stale entry is evicted on the way out. Hits do not extend the
    /// entry's lifetime.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(&entry_key(key)) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "error reading from cache");
                return None;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "unreadable cache entry, treating as miss");
                return None;
            }
        };

        if self.is_expired(entry.timestamp) {
            debug!(key, "cache entry expired");
            self.remove(key);
            return None;
        }

        debug!(key, "cache hit");
        Some(entry.data)
    }

    /// Store `data` under `key` with a fresh timestamp.
    ///
    /// Inserting a new key into a full cache first evicts the oldest-inserted
    /// key. Failures are logged and the write dropped; a quota failure also
    /// clears the cache so the next write starts from an empty store.
    pub fn set<T: Serialize>(&self, key: &str, data: &T) {
        let entry = CacheEntry {
            data,
            timestamp: self.clock.now_millis(),
            key: key.to_owned(),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache payload is not serializable");
                return;
            }
        };

        let _guard = self.lock();
        if let Err(e) = self.set_locked(key, &raw) {
            warn!(key, error = %e, "error writing to cache");
            if e.is_quota_exceeded() {
                self.clear_locked();
            }
        }
    }

    /// Drop `key` and its index slot. No-op when absent.
    pub fn remove(&self, key: &str) {
        let _guard = self.lock();
        self.remove_locked(key);
    }

    /// Drop every indexed entry and empty the index.
    pub fn clear(&self) {
        let _guard = self.lock();
        self.clear_locked();
    }

    /// Snapshot of resident entries with their age and serialized size.
    ///
    /// Unreadable entries are left out.
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now_millis();
        let entries: Vec<CacheEntryStats> = self
            .read_index()
            .into_iter()
            .filter_map(|key| {
                let raw = self.store.get(&entry_key(&key)).ok()??;
                let entry: CacheEntry<IgnoredAny> = serde_json::from_str(&raw).ok()?;
                Some(CacheEntryStats {
                    age: now - entry.timestamp,
                    size: raw.len(),
                    key,
                })
            })
            .collect();

        CacheStats {
            size: entries.len(),
            entries,
        }
    }

    /// Resident keys, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.read_index()
    }

    pub fn len(&self) -> usize {
        self.read_index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read_index().iter().any(|k| k == key)
    }

    fn set_locked(&self, key: &str, raw: &str) -> Result<(), StoreError> {
        if self.config.max_size == 0 {
            return Ok(());
        }

        let mut index = self.read_index();
        let is_new = !index.iter().any(|k| k == key);

        if is_new && index.len() >= self.config.max_size {
            while index.len() >= self.config.max_size {
                let oldest = index.remove(0);
                self.store.remove(&entry_key(&oldest))?;
                debug!(key = %oldest, "evicted oldest cache entry");
            }
            self.write_index(&index)?;
        }

        self.store.set(&entry_key(key), raw)?;

        if is_new {
            index.push(key.to_owned());
            if let Err(e) = self.write_index(&index) {
                // An entry missing from the index could never be evicted or cleared.
                if let Err(remove_err) = self.store.remove(&entry_key(key)) {
                    warn!(key, error = %remove_err, "error rolling back unindexed cache entry");
                }
                return Err(e);
            }
        }

        debug!(key, bytes = raw.len(), "cache set");
        Ok(())
    }

    fn remove_locked(&self, key: &str) {
        if let Err(e) = self.store.remove(&entry_key(key)) {
            warn!(key, error = %e, "error removing cache entry");
        }

        let index: Vec<String> = self
            .read_index()
            .into_iter()
            .filter(|k| k != key)
            .collect();
        if let Err(e) = self.write_index(&index) {
            warn!(key, error = %e, "error updating cache index");
        }
    }

    /// Remove every indexed entry, plus any prefixed entry the index lost track of.
    fn clear_locked(&self) {
        let index = self.read_index();
        let mut stored: Vec<String> = index.iter().map(|key| entry_key(key)).collect();
        match self.store.keys() {
            Ok(keys) => {
                let orphans: Vec<String> = keys
                    .into_iter()
                    .filter(|k| {
                        k.starts_with(CACHE_KEY_PREFIX) && k != INDEX_KEY && !stored.contains(k)
                    })
                    .collect();
                stored.extend(orphans);
            }
            Err(e) => warn!(error = %e, "error listing stored cache entries"),
        }

        for stored_key in &stored {
            if let Err(e) = self.store.remove(stored_key) {
                warn!(key = %stored_key, error = %e, "error removing cache entry");
            }
        }
        if let Err(e) = self.write_index(&[]) {
            warn!(error = %e, "error resetting cache index");
        }
        info!(entries = index.len(), "cache cleared");
    }

    fn read_index(&self) -> Vec<String> {
        match self.store.get(INDEX_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "error reading cache index");
                Vec::new()
            }
        }
    }

    fn write_index(&self, index: &[String]) -> Result<(), StoreError> {
        // A list of strings always serializes.
        let raw = serde_json::to_string(index).unwrap_or_else(|_| "[]".to_owned());
        self.store.set(INDEX_KEY, &raw)
    }

    fn is_expired(&self, timestamp: i64) -> bool {
        self.clock.now_millis().saturating_sub(timestamp) > duration_millis(self.config.ttl)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.index_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn entry_key(key: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{key}")
}
