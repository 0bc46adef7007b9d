//! The explicitly owned store object.
//!
//! All process-wide mutable state of the subsystem — the memory fallback and
//! the lazily connected durable client — lives inside [`ExhibitStore`],
//! which the transport layer constructs at startup and holds for the process
//! lifetime. Tests swap the durable backend via plain constructor injection.

use std::sync::Arc;

use configs::KvConfig;
use models::entry::StorageMode;

use crate::entry_store::EntryStore;
use crate::kv::memory::MemoryBackend;
use crate::kv::{BackendSelector, KvBackend};
use crate::trash_store::TrashStore;

pub(crate) struct StoreCore {
    pub(crate) selector: BackendSelector,
    pub(crate) memory: MemoryBackend,
}

/// Entry point to the examples persistence subsystem.
#[derive(Clone)]
pub struct ExhibitStore {
    core: Arc<StoreCore>,
}

impl ExhibitStore {
    /// Build from environment configuration; with no KV variables set the
    /// store runs purely in memory.
    pub fn from_env() -> Self {
        Self::new(KvConfig::from_env())
    }

    pub fn new(config: KvConfig) -> Self {
        Self {
            core: Arc::new(StoreCore {
                selector: BackendSelector::new(config),
                memory: MemoryBackend::new(),
            }),
        }
    }

    /// A store with no durable backend at all, regardless of environment.
    pub fn in_memory() -> Self {
        Self::new(KvConfig::default())
    }

    /// A store whose durable backend is the given handle. Reports `kv` mode.
    pub fn with_backend(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            core: Arc::new(StoreCore {
                selector: BackendSelector::with_backend(backend),
                memory: MemoryBackend::new(),
            }),
        }
    }

    /// The storage mode the next operation would use.
    pub fn mode(&self) -> StorageMode {
        self.core.selector.mode()
    }

    pub fn entries(&self) -> EntryStore {
        EntryStore::new(self.core.clone())
    }

    pub fn trash(&self) -> TrashStore {
        TrashStore::new(self.core.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_reports_memory_mode() {
        assert_eq!(ExhibitStore::in_memory().mode(), StorageMode::Memory);
    }

    #[test]
    fn injected_backend_reports_kv_mode() {
        let store = ExhibitStore::with_backend(Arc::new(MemoryBackend::new()));
        assert_eq!(store.mode(), StorageMode::Kv);
    }
}
