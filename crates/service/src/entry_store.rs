//! CRUD over example entries keyed by canonical path.
//!
//! Durable writes are verified by an immediate read-back before success is
//! reported, and every durable write or hit is mirrored into the memory
//! fallback. Deletion is idempotent and best-effort against the durable
//! backend. Concurrent writes to one path race exactly as the backend's own
//! `set` does; single-author editing is the assumed usage.

use std::slice;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use models::entry::{EntryPayload, ExampleEntry, StorageMode};
use tracing::{info, warn};

use crate::codec;
use crate::errors::{FailureCode, StoreError};
use crate::kv::keys;
use crate::paths;
use crate::store::StoreCore;

#[derive(Clone)]
pub struct EntryStore {
    core: Arc<StoreCore>,
}

impl EntryStore {
    pub(crate) fn new(core: Arc<StoreCore>) -> Self {
        Self { core }
    }

    /// Fetch the entry for a raw path, if any. In kv mode a durable miss
    /// still falls through to the memory mirror.
    pub async fn get(&self, raw_path: &str) -> Result<Option<ExampleEntry>, StoreError> {
        let path = canonical(raw_path)?;
        match self.core.selector.mode() {
            StorageMode::Kv => {
                let backend = self.core.selector.load().await?;
                let stored = backend
                    .get(&keys::entry(&path))
                    .await
                    .map_err(|e| StoreError::op(FailureCode::Read, e))?;
                match stored {
                    Some(raw) => {
                        let mut entry = parse_entry(&raw)?;
                        entry.storage_mode = StorageMode::Kv;
                        self.mirror(&path, &entry).await;
                        Ok(Some(entry))
                    }
                    None => Ok(self.read_memory(&path).await),
                }
            }
            StorageMode::Memory => Ok(self.read_memory(&path).await),
        }
    }

    /// Write the full entry for a raw path, replacing whatever was there.
    /// An accepted-but-unreadable durable write is a hard failure.
    pub async fn set(&self, raw_path: &str, payload: EntryPayload) -> Result<ExampleEntry, StoreError> {
        let path = canonical(raw_path)?;
        let mut entry = ExampleEntry {
            path: path.clone(),
            examples: payload.examples.iter().map(codec::sanitize_example).collect(),
            deleted_provided: sanitize_deleted(payload.deleted_provided),
            updated_at: payload.updated_at.unwrap_or_else(Utc::now),
            storage_mode: StorageMode::Memory,
        };
        match self.core.selector.mode() {
            StorageMode::Kv => {
                let backend = self.core.selector.load().await?;
                entry.storage_mode = StorageMode::Kv;
                let key = keys::entry(&path);
                let raw = serde_json::to_string(&entry)
                    .map_err(|e| StoreError::op(FailureCode::Write, e))?;
                backend
                    .set(&key, &raw)
                    .await
                    .map_err(|e| StoreError::op(FailureCode::Write, e))?;
                backend
                    .sadd(keys::PATH_INDEX, slice::from_ref(&path))
                    .await
                    .map_err(|e| StoreError::op(FailureCode::Write, e))?;
                let confirmed = backend
                    .get(&key)
                    .await
                    .map_err(|e| StoreError::op(FailureCode::Read, e))?;
                if confirmed.is_none() {
                    return Err(StoreError::op(
                        FailureCode::WriteVerification,
                        anyhow!("write for {path} was not visible on read-back"),
                    ));
                }
                self.mirror(&path, &entry).await;
                info!(path = %path, examples = entry.examples.len(), mode = %entry.storage_mode, "example_entry_saved");
                Ok(entry)
            }
            StorageMode::Memory => {
                self.mirror(&path, &entry).await;
                info!(path = %path, examples = entry.examples.len(), mode = %entry.storage_mode, "example_entry_saved");
                Ok(entry)
            }
        }
    }

    /// Remove an entry everywhere. Durable failures downgrade to warnings;
    /// the memory side always clears. Returns whether anything existed.
    pub async fn delete(&self, raw_path: &str) -> Result<bool, StoreError> {
        let path = canonical(raw_path)?;
        let key = keys::entry(&path);
        let mut existed = false;
        if self.core.selector.mode() == StorageMode::Kv {
            match self.core.selector.load().await {
                Ok(backend) => {
                    match backend.del(&key).await {
                        Ok(removed) => existed = removed,
                        Err(e) => warn!(path = %path, error = %e, "kv_delete_failed"),
                    }
                    if let Err(e) = backend.srem(keys::PATH_INDEX, slice::from_ref(&path)).await {
                        warn!(path = %path, error = %e, "kv_index_cleanup_failed");
                    }
                }
                Err(e) => warn!(path = %path, error = %e, "kv_unavailable_for_delete"),
            }
        }
        let in_memory = self.core.memory.remove(&key).await;
        self.core.memory.set_remove(keys::PATH_INDEX, slice::from_ref(&path)).await;
        Ok(existed || in_memory)
    }

    /// All known entries, ordered by canonical path. Records the index knows
    /// about but that fail to load are skipped, not fatal.
    pub async fn list(&self) -> Result<Vec<ExampleEntry>, StoreError> {
        match self.core.selector.mode() {
            StorageMode::Kv => {
                let backend = self.core.selector.load().await?;
                let mut known = backend
                    .smembers(keys::PATH_INDEX)
                    .await
                    .map_err(|e| StoreError::op(FailureCode::Read, e))?;
                known.sort();
                let mut out = Vec::with_capacity(known.len());
                for path in known {
                    let stored = backend
                        .get(&keys::entry(&path))
                        .await
                        .map_err(|e| StoreError::op(FailureCode::Read, e))?;
                    let Some(raw) = stored else {
                        warn!(path = %path, "kv_index_points_at_missing_entry");
                        continue;
                    };
                    match serde_json::from_str::<ExampleEntry>(&raw) {
                        Ok(mut entry) => {
                            entry.storage_mode = StorageMode::Kv;
                            self.mirror(&path, &entry).await;
                            out.push(entry);
                        }
                        Err(e) => warn!(path = %path, error = %e, "kv_entry_malformed_skipped"),
                    }
                }
                Ok(out)
            }
            StorageMode::Memory => {
                let known = self.core.memory.set_members(keys::PATH_INDEX).await;
                let mut out = Vec::with_capacity(known.len());
                for path in known {
                    if let Some(entry) = self.read_memory(&path).await {
                        out.push(entry);
                    }
                }
                Ok(out)
            }
        }
    }

    async fn read_memory(&self, path: &str) -> Option<ExampleEntry> {
        let raw = self.core.memory.fetch(&keys::entry(path)).await?;
        match serde_json::from_str::<ExampleEntry>(&raw) {
            Ok(mut entry) => {
                entry.storage_mode = StorageMode::Memory;
                Some(entry)
            }
            Err(e) => {
                warn!(path = %path, error = %e, "memory_entry_malformed");
                None
            }
        }
    }

    /// Write-through into the memory fallback so reads stay warm if the
    /// durable backend later becomes unreachable.
    async fn mirror(&self, path: &str, entry: &ExampleEntry) {
        if let Ok(raw) = serde_json::to_string(entry) {
            let owned = path.to_string();
            self.core.memory.put(&keys::entry(path), &raw).await;
            self.core.memory.set_add(keys::PATH_INDEX, slice::from_ref(&owned)).await;
        }
    }
}

fn canonical(raw_path: &str) -> Result<String, StoreError> {
    paths::canonicalize(raw_path).ok_or_else(|| StoreError::InvalidPath(raw_path.to_string()))
}

fn parse_entry(raw: &str) -> Result<ExampleEntry, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::op(FailureCode::MalformedPayload, e))
}

/// Trim, drop blanks, dedupe keeping first occurrence.
fn sanitize_deleted(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::MemoryBackend;
    use crate::store::ExhibitStore;
    use crate::test_support::FlakyKv;
    use serde_json::json;

    fn payload(examples: Vec<serde_json::Value>) -> EntryPayload {
        EntryPayload { examples, ..Default::default() }
    }

    #[tokio::test]
    async fn memory_mode_crud_cycle_is_transparent() -> Result<(), anyhow::Error> {
        let store = ExhibitStore::in_memory();
        let entries = store.entries();

        assert!(entries.get("/diagram").await?.is_none());

        let saved = entries.set("/diagram", payload(vec![json!({"x": 1})])).await?;
        assert_eq!(saved.storage_mode, StorageMode::Memory);
        assert_eq!(saved.path, "/diagram");

        let loaded = entries.get("/diagram").await?.expect("entry present");
        assert_eq!(loaded.storage_mode, StorageMode::Memory);
        assert_eq!(loaded.examples, vec![json!({"x": 1})]);

        assert!(entries.delete("/diagram").await?);
        assert!(!entries.delete("/diagram").await?); // idempotent
        assert!(entries.get("/diagram").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn legacy_path_spellings_hit_the_same_entry() -> Result<(), anyhow::Error> {
        let store = ExhibitStore::in_memory();
        let entries = store.entries();

        let saved = entries.set("/diagram.html", payload(vec![json!({"x": 1})])).await?;
        assert_eq!(saved.path, "/diagram");

        let loaded = entries.get("/diagram").await?.expect("entry present");
        assert_eq!(loaded.path, "/diagram");
        assert_eq!(loaded.examples, saved.examples);

        let also = entries.get("diagram/index.htm").await?.expect("entry present");
        assert_eq!(also.path, "/diagram");
        Ok(())
    }

    #[tokio::test]
    async fn kv_write_then_read_returns_the_sanitized_payload() -> Result<(), anyhow::Error> {
        let store = ExhibitStore::with_backend(Arc::new(MemoryBackend::new()));
        let entries = store.entries();

        let body = EntryPayload {
            examples: vec![json!({"shape": {"$type": "set", "values": ["a", "a", "b"]}})],
            deleted_provided: vec!["  one ".into(), "one".into(), "".into(), "two".into()],
            updated_at: None,
        };
        let saved = entries.set("/Widget/", body).await?;
        assert_eq!(saved.storage_mode, StorageMode::Kv);
        assert_eq!(saved.deleted_provided, vec!["one", "two"]);
        // duplicate set member collapsed by sanitization
        assert_eq!(saved.examples[0]["shape"]["values"], json!(["a", "b"]));

        let loaded = entries.get("/widget").await?.expect("entry present");
        assert_eq!(loaded, saved);
        Ok(())
    }

    #[tokio::test]
    async fn unverified_kv_writes_are_hard_failures() {
        let flaky = Arc::new(FlakyKv::new());
        flaky.swallow_writes();
        let store = ExhibitStore::with_backend(flaky);

        let err = store
            .entries()
            .set("/diagram", payload(vec![json!({"x": 1})]))
            .await
            .expect_err("swallowed write must not report success");
        assert_eq!(err.code(), Some(FailureCode::WriteVerification));
    }

    #[tokio::test]
    async fn kv_miss_falls_through_to_the_memory_mirror() -> Result<(), anyhow::Error> {
        let double = Arc::new(MemoryBackend::new());
        let store = ExhibitStore::with_backend(double.clone());
        let entries = store.entries();

        entries.set("/diagram", payload(vec![json!({"x": 1})])).await?;
        // the durable side loses the key; the mirror still has it
        double.remove(&keys::entry("/diagram")).await;

        let loaded = entries.get("/diagram").await?.expect("mirror hit");
        assert_eq!(loaded.storage_mode, StorageMode::Memory);
        assert_eq!(loaded.examples, vec![json!({"x": 1})]);
        Ok(())
    }

    #[tokio::test]
    async fn list_skips_malformed_durable_records() -> Result<(), anyhow::Error> {
        let double = Arc::new(MemoryBackend::new());
        let store = ExhibitStore::with_backend(double.clone());
        let entries = store.entries();

        entries.set("/good", payload(vec![json!({"x": 1})])).await?;
        double.put(&keys::entry("/bad"), "{ not json").await;
        double.set_add(keys::PATH_INDEX, &["/bad".into()]).await;

        let listed = entries.list().await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, "/good");
        assert_eq!(listed[0].storage_mode, StorageMode::Kv);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_paths_are_rejected_up_front() {
        let store = ExhibitStore::in_memory();
        let err = store.entries().get("   ").await.expect_err("blank path");
        assert!(matches!(err, StoreError::InvalidPath(_)));
    }
}
