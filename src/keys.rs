//! Canonical fingerprints for filter sets.
//!
//! A cache key is the base64 encoding of the filter set serialized in a fixed
//! field order with its id lists sorted, so permutations of the same filters
//! share one key and the key can be decoded back for inspection.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("cache key is not valid base64")]
    Base64(#[from] base64::DecodeError),
    #[error("cache key does not contain a filter set")]
    Json(#[from] serde_json::Error),
}

/// Dashboard filter selection. Every field is optional on input.
///
/// Field order here is the canonical serialization order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterParams {
    pub states: Vec<String>,
    pub dma_ids: Vec<String>,
    pub dc_ids: Vec<String>,
    pub start_date: String,
    pub end_date: String,
}

impl FilterParams {
    /// The same filters with every id list sorted ascending.
    pub fn canonical(&self) -> FilterParams {
        let sorted = |values: &[String]| {
            let mut values = values.to_vec();
            values.sort();
            values
        };
        FilterParams {
            states: sorted(&self.states),
            dma_ids: sorted(&self.dma_ids),
            dc_ids: sorted(&self.dc_ids),
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
        }
    }

    /// Deduplication key for fetching these filters from `endpoint`.
    pub fn request_key(&self, endpoint: &str) -> String {
        let params = match serde_json::to_value(self.canonical()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        create_request_key(endpoint, &params)
    }
}

/// Build the cache key for a filter set.
pub fn build_key(params: &FilterParams) -> String {
    // Serializing plain strings and vectors cannot fail.
    let json = serde_json::to_string(&params.canonical()).unwrap_or_default();
    STANDARD.encode(json)
}

/// Recover the filter set a cache key was built from.
pub fn decode_key(key: &str) -> Result<FilterParams, KeyError> {
    let bytes = STANDARD.decode(key)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Build a deduplication key as `endpoint:{json}`.
///
/// Parameters are ordered by name and null values are dropped, so argument
/// order and absent-vs-null never produce distinct keys.
pub fn create_request_key(endpoint: &str, params: &Map<String, Value>) -> String {
    let mut names: Vec<&String> = params.keys().collect();
    names.sort();

    let mut sorted = Map::new();
    for name in names {
        let value = &params[name];
        if !value.is_null() {
            sorted.insert(name.clone(), value.clone());
        }
    }

    format!("{endpoint}:{}", Value::Object(sorted))
}
