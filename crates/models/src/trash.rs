use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hard cap on the trash ledger length. `append` limits clamp to this.
pub const TRASH_LIMIT: usize = 200;

/// Where a batch joins the ledger. `Prepend` keeps the newest records at the
/// head, which is the default presentation order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppendMode {
    #[default]
    Prepend,
    Append,
}

/// One archived example record.
///
/// `example` is the codec-encoded snapshot; everything else is provenance.
/// Records are deduplicated by `id` across the ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashEntry {
    pub id: String,
    pub example: Value,
    pub deleted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub imported_from_history: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Result of a trash deletion: how many records went away, and the ledger
/// that remains.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashDeleteOutcome {
    pub removed: usize,
    pub entries: Vec<TrashEntry>,
}
