//! The trash ledger: a bounded, ordered, id-deduplicated list of archived
//! example records.
//!
//! The whole ledger lives under one key and is rewritten in full on every
//! mutation. Individual malformed records are dropped during sanitization
//! without aborting the batch; a wholly unreadable ledger resets to empty
//! with a warning rather than failing reads forever.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use models::entry::StorageMode;
use models::trash::{AppendMode, TrashDeleteOutcome, TrashEntry, TRASH_LIMIT};
use serde_json::{Map as JsonMap, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec;
use crate::errors::{FailureCode, StoreError};
use crate::kv::keys;
use crate::paths;
use crate::store::StoreCore;

#[derive(Clone)]
pub struct TrashStore {
    core: Arc<StoreCore>,
}

impl TrashStore {
    pub(crate) fn new(core: Arc<StoreCore>) -> Self {
        Self { core }
    }

    /// The current ledger, sanitized and deduplicated. The sanitized form is
    /// mirrored into memory so later reads survive a backend outage.
    pub async fn get(&self) -> Result<Vec<TrashEntry>, StoreError> {
        let records = self.read_ledger().await?;
        let entries = dedupe_keep_last(sanitize_batch(&records));
        self.mirror(&entries).await;
        Ok(entries)
    }

    /// Replace the ledger wholesale.
    pub async fn set(&self, records: Vec<Value>) -> Result<Vec<TrashEntry>, StoreError> {
        let mut entries = dedupe_keep_first(sanitize_batch(&records));
        entries.truncate(TRASH_LIMIT);
        self.persist(&entries).await?;
        Ok(entries)
    }

    /// Merge a batch into the ledger. Same-id records resolve to the
    /// incoming version; `Prepend` (the default) keeps the newest records at
    /// the head, `Append` at the tail, and truncation keeps that end.
    pub async fn append(
        &self,
        records: Vec<Value>,
        mode: AppendMode,
        limit: Option<usize>,
    ) -> Result<Vec<TrashEntry>, StoreError> {
        let batch = sanitize_batch(&records);
        if batch.is_empty() {
            return self.get().await;
        }
        let current = self.get().await?;
        let limit = limit.unwrap_or(TRASH_LIMIT).clamp(1, TRASH_LIMIT);

        // the batch holds the newest version of any id it mentions
        let mut newest: HashMap<String, TrashEntry> = HashMap::new();
        for entry in &batch {
            newest.insert(entry.id.clone(), entry.clone());
        }

        let combined: Vec<TrashEntry> = match mode {
            AppendMode::Prepend => batch.into_iter().chain(current).collect(),
            AppendMode::Append => current.into_iter().chain(batch).collect(),
        };
        let mut seen = HashSet::new();
        let mut merged = Vec::with_capacity(combined.len());
        for entry in combined {
            if !seen.insert(entry.id.clone()) {
                continue;
            }
            // first occurrence fixes the position, the newest data wins
            let entry = newest.remove(&entry.id).unwrap_or(entry);
            merged.push(entry);
        }
        match mode {
            AppendMode::Prepend => merged.truncate(limit),
            AppendMode::Append => {
                if merged.len() > limit {
                    merged = merged.split_off(merged.len() - limit);
                }
            }
        }
        self.persist(&merged).await?;
        info!(count = merged.len(), "trash_ledger_appended");
        Ok(merged)
    }

    /// Remove every record whose id is in `ids`, in one pass. Unknown ids
    /// are a no-op.
    pub async fn delete(&self, ids: &[String]) -> Result<TrashDeleteOutcome, StoreError> {
        let current = self.get().await?;
        let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let before = current.len();
        let entries: Vec<TrashEntry> = current
            .into_iter()
            .filter(|entry| !targets.contains(entry.id.as_str()))
            .collect();
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries).await?;
            info!(removed, remaining = entries.len(), "trash_entries_deleted");
        }
        Ok(TrashDeleteOutcome { removed, entries })
    }

    /// Convenience for single-id deletion.
    pub async fn delete_one(&self, id: &str) -> Result<TrashDeleteOutcome, StoreError> {
        self.delete(&[id.to_string()]).await
    }

    async fn read_ledger(&self) -> Result<Vec<Value>, StoreError> {
        let stored = match self.core.selector.mode() {
            StorageMode::Kv => {
                let backend = self.core.selector.load().await?;
                backend
                    .get(keys::TRASH)
                    .await
                    .map_err(|e| StoreError::op(FailureCode::Read, e))?
            }
            StorageMode::Memory => self.core.memory.fetch(keys::TRASH).await,
        };
        let Some(raw) = stored else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(records) => Ok(records),
            Err(e) => {
                warn!(error = %e, "trash_ledger_unreadable_treated_as_empty");
                Ok(Vec::new())
            }
        }
    }

    async fn persist(&self, entries: &[TrashEntry]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(entries)
            .map_err(|e| StoreError::op(FailureCode::Write, e))?;
        if self.core.selector.mode() == StorageMode::Kv {
            let backend = self.core.selector.load().await?;
            backend
                .set(keys::TRASH, &raw)
                .await
                .map_err(|e| StoreError::op(FailureCode::Write, e))?;
        }
        self.core.memory.put(keys::TRASH, &raw).await;
        Ok(())
    }

    async fn mirror(&self, entries: &[TrashEntry]) {
        if let Ok(raw) = serde_json::to_string(entries) {
            self.core.memory.put(keys::TRASH, &raw).await;
        }
    }
}

/// Build a [`TrashEntry`] from one raw record, or drop it. A record needs a
/// decodable `example`; everything else is derived or defaulted.
fn sanitize_record(raw: &Value) -> Option<TrashEntry> {
    let fields = raw.as_object()?;
    let example = fields.get("example")?;
    if !codec::is_decodable(example) {
        return None;
    }
    Some(TrashEntry {
        id: fields
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        example: codec::sanitize_example(example),
        deleted_at: fields
            .get("deletedAt")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|at| at.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
        source_path: fields
            .get("sourcePath")
            .and_then(Value::as_str)
            .and_then(paths::canonicalize),
        source_path_raw: trimmed(fields, "sourcePathRaw"),
        source_href: trimmed(fields, "sourceHref"),
        source_title: trimmed(fields, "sourceTitle"),
        reason: trimmed(fields, "reason"),
        removed_at_index: fields.get("removedAtIndex").and_then(Value::as_i64),
        label: trimmed(fields, "label"),
        imported_from_history: fields
            .get("importedFromHistory")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        metadata: fields.get("metadata").filter(|m| !m.is_null()).cloned(),
    })
}

fn trimmed(fields: &JsonMap<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn sanitize_batch(records: &[Value]) -> Vec<TrashEntry> {
    records
        .iter()
        .filter_map(|raw| {
            let entry = sanitize_record(raw);
            if entry.is_none() {
                debug!("trash_record_dropped");
            }
            entry
        })
        .collect()
}

fn dedupe_keep_first(entries: Vec<TrashEntry>) -> Vec<TrashEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.id.clone()))
        .collect()
}

fn dedupe_keep_last(entries: Vec<TrashEntry>) -> Vec<TrashEntry> {
    let mut out: Vec<TrashEntry> = Vec::with_capacity(entries.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for entry in entries {
        match index.get(&entry.id) {
            Some(&at) => out[at] = entry,
            None => {
                index.insert(entry.id.clone(), out.len());
                out.push(entry);
            }
        }
    }
    out
}
