//! Persistence services for the examples catalog.
//! - Canonicalizes route-like paths into unique storage keys.
//! - Round-trips rich example payloads (maps, sets, dates, patterns,
//!   shared/cyclic structures) through a JSON-safe codec.
//! - Selects between a durable KV backend and an in-process fallback,
//!   mirroring every durable write into memory.
//! - Exposes entry CRUD and a bounded, deduplicated trash ledger.

pub mod codec;
pub mod entry_store;
pub mod errors;
pub mod kv;
pub mod paths;
pub mod store;
pub mod trash_store;

#[cfg(test)]
pub mod test_support;
