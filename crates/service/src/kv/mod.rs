//! Backend selection over the durable KV protocol and the in-process
//! fallback.
//!
//! Storage mode is recomputed on every call, never cached as a permanent
//! fact: an injected backend or a configured connection means `kv`,
//! anything else means `memory`. The durable connection itself is a lazy
//! singleton; concurrent first callers share one in-flight attempt and a
//! failed attempt leaves nothing cached, so the next call retries.

pub mod client;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use configs::KvConfig;
use models::entry::StorageMode;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::errors::{FailureCode, StoreError};

/// Key layout under the durable backend. One key per canonical path, one
/// index set of all known paths, one key for the whole trash ledger.
pub mod keys {
    pub const ENTRY_PREFIX: &str = "examples:";
    pub const PATH_INDEX: &str = "examples:__paths__";
    pub const TRASH: &str = "examples:__trash__";

    pub fn entry(canonical_path: &str) -> String {
        format!("{ENTRY_PREFIX}{canonical_path}")
    }
}

/// Uniform operation surface over any KV backend: the durable store, the
/// memory fallback, or a test double. Values are opaque strings.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    /// Returns whether a key was actually removed.
    async fn del(&self, key: &str) -> anyhow::Result<bool>;
    async fn sadd(&self, key: &str, members: &[String]) -> anyhow::Result<()>;
    async fn srem(&self, key: &str, members: &[String]) -> anyhow::Result<()>;
    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>>;
}

/// Decides which backend serves a call and owns the lazily connected
/// durable client.
pub struct BackendSelector {
    config: KvConfig,
    injected: Option<Arc<dyn KvBackend>>,
    client: OnceCell<Arc<client::RedisBackend>>,
}

impl BackendSelector {
    pub fn new(config: KvConfig) -> Self {
        Self { config, injected: None, client: OnceCell::new() }
    }

    /// Use a caller-provided backend instead of connecting anywhere. The
    /// store then reports `kv` mode and routes every durable call here.
    pub fn with_backend(backend: Arc<dyn KvBackend>) -> Self {
        Self { config: KvConfig::default(), injected: Some(backend), client: OnceCell::new() }
    }

    /// Current storage mode, derived fresh on every call.
    pub fn mode(&self) -> StorageMode {
        if self.injected.is_some() || self.config.is_configured() {
            StorageMode::Kv
        } else {
            StorageMode::Memory
        }
    }

    /// Resolve the active durable backend: the injected handle when present,
    /// otherwise the shared lazily-connected client.
    pub async fn load(&self) -> Result<Arc<dyn KvBackend>, StoreError> {
        if let Some(backend) = &self.injected {
            return Ok(backend.clone());
        }
        if !self.config.is_configured() {
            return Err(StoreError::NotConfigured);
        }
        let backend = self
            .client
            .get_or_try_init(|| async {
                let resolved = self
                    .config
                    .resolve()
                    .map_err(|e| StoreError::op(FailureCode::Connect, e))?;
                debug!(host = %resolved.host, port = resolved.port, tls = resolved.tls, "kv_connecting");
                let client = client::RedisBackend::connect(&resolved)
                    .await
                    .map_err(|e| StoreError::op(FailureCode::Connect, e))?;
                Ok::<_, StoreError>(Arc::new(client))
            })
            .await?;
        Ok(backend.clone())
    }
}
