use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which backend actually served a read or write.
///
/// Stamped onto every entry returned by the store so callers can surface
/// durability to end users. `Memory` state is process-local and reset on
/// restart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Kv,
    #[default]
    Memory,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Kv => f.write_str("kv"),
            StorageMode::Memory => f.write_str("memory"),
        }
    }
}

/// One stored collection of examples, keyed by canonical path.
///
/// At most one entry exists per canonical path. Writes fully replace
/// `examples`, `deleted_provided` and `updated_at`; there is no partial merge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExampleEntry {
    pub path: String,
    #[serde(default)]
    pub examples: Vec<Value>,
    #[serde(default)]
    pub deleted_provided: Vec<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub storage_mode: StorageMode,
}

/// Caller-supplied body for an entry write.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryPayload {
    pub examples: Vec<Value>,
    pub deleted_provided: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}
