//! Application configuration, read from the environment through figment.

use crate::cache::CacheConfig;
use crate::store::{FileStore, KvStore, MemoryStore, StoreError};
use crate::utils::split_list;
use figment::Figment;
use figment::providers::Env;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where cached forecast entries are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Level for this crate's targets when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Dashboard data API the forecast rows are fetched from. Only `serve` needs it.
    #[serde(default)]
    pub upstream_url: Option<String>,
    #[serde(default = "default_upstream_timeout", deserialize_with = "duration")]
    pub upstream_timeout: Duration,
    #[serde(default = "default_cache_ttl", deserialize_with = "duration")]
    pub cache_ttl: Duration,
    #[serde(default = "default_cache_max_size")]
    pub cache_max_size: usize,
    #[serde(default)]
    pub cache_backend: CacheBackend,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_cache_quota_bytes")]
    pub cache_quota_bytes: usize,
    #[serde(default = "default_shutdown_timeout", deserialize_with = "duration")]
    pub shutdown_timeout: Duration,
    /// States whose full-history view is warmed at startup.
    #[serde(default, deserialize_with = "string_list")]
    pub preload_states: Vec<String>,
}

impl Config {
    /// Figment reading raw (unprefixed) environment variables.
    pub fn figment() -> Figment {
        Figment::new().merge(Env::raw())
    }

    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: self.cache_ttl,
            max_size: self.cache_max_size,
        }
    }

    /// Open the configured cache backend.
    pub fn open_store(&self) -> Result<Arc<dyn KvStore>, StoreError> {
        let quota = (self.cache_quota_bytes > 0).then_some(self.cache_quota_bytes);
        Ok(match self.cache_backend {
            CacheBackend::Memory => match quota {
                Some(bytes) => Arc::new(MemoryStore::with_capacity_bytes(bytes)),
                None => Arc::new(MemoryStore::new()),
            },
            CacheBackend::File => Arc::new(FileStore::open(&self.cache_dir, quota)?),
        })
    }

    /// The file store under `cache_dir`, regardless of the configured backend.
    pub fn open_file_store(&self) -> Result<FileStore, StoreError> {
        let quota = (self.cache_quota_bytes > 0).then_some(self.cache_quota_bytes);
        FileStore::open(&self.cache_dir, quota)
    }
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_port() -> u16 {
    8080
}

fn default_upstream_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_cache_ttl() -> Duration {
    CacheConfig::default().ttl
}

fn default_cache_max_size() -> usize {
    CacheConfig::default().max_size
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".forecast-cache")
}

fn default_cache_quota_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

/// Accepts bare seconds (`300`) or a human duration (`5m`, `90s`).
fn duration<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(d)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => fundu::parse_duration(text.trim()).map_err(serde::de::Error::custom),
    }
}

/// Accepts a comma-separated string or a list.
fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Text(String),
    }

    Ok(match Raw::deserialize(d)? {
        Raw::List(items) => items,
        Raw::Text(text) => split_list(&text),
    })
}
