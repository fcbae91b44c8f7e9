use super::{KvStore, StoreError};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, String>,
    /// Sum of key and value lengths across `values`.
    used: usize,
}

/// In-process store with an optional byte quota.
///
/// Usage is measured as key length plus value length, the same accounting a
/// browser applies to `localStorage`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_bytes(capacity: usize) -> Self {
        Self {
            inner: Mutex::default(),
            capacity: Some(capacity),
        }
    }

    /// Bytes currently accounted against the quota.
    pub fn used_bytes(&self) -> usize {
        self.lock().used
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let previous = inner.values.get(key).map_or(0, |v| key.len() + v.len());
        let needed = key.len() + value.len();
        let projected = inner.used - previous + needed;

        if let Some(capacity) = self.capacity
            && projected > capacity
        {
            return Err(StoreError::QuotaExceeded { needed, capacity });
        }

        inner.values.insert(key.to_owned(), value.to_owned());
        inner.used = projected;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(value) = inner.values.remove(key) {
            inner.used -= key.len() + value.len();
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().values.keys().cloned().collect())
    }
}
