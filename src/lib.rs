//! Persistence layer for user-authored examples of interactive visual tools.
//!
//! The transport layer (HTTP routing, CORS, body parsing) lives outside this
//! workspace and consumes the store through [`ExhibitStore`]: raw route
//! strings and parsed JSON bodies go in, typed entries and [`StoreError`]
//! values come out. Storage degrades transparently to an in-process map when
//! no durable KV backend is configured.

pub use common::utils::logging::{init_logging_default, init_logging_json};
pub use configs::KvConfig;
pub use models::entry::{EntryPayload, ExampleEntry, StorageMode};
pub use models::trash::{AppendMode, TrashDeleteOutcome, TrashEntry, TRASH_LIMIT};
pub use service::codec;
pub use service::entry_store::EntryStore;
pub use service::errors::{FailureCode, StoreError};
pub use service::kv::KvBackend;
pub use service::paths;
pub use service::store::ExhibitStore;
pub use service::trash_store::TrashStore;
