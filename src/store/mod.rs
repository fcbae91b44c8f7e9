//! Synchronous string key-value stores backing the forecast cache.
//!
//! The cache only needs `get/set/remove/keys` and a way to learn that the
//! store is full, so backends stay tiny: an in-process map for the server
//! and tests, and a directory of files for the CLI tooling.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The write would push the store past its byte capacity.
    #[error("store quota exceeded: write needs {needed} bytes, capacity is {capacity}")]
    QuotaExceeded { needed: usize, capacity: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded { .. })
    }
}

pub trait KvStore: Send + Sync {
    /// Value stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Insert or overwrite `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`. Absent keys are not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Every key currently stored, in no particular order.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}
