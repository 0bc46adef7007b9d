//! Plain data types shared by the examples persistence services.
//! - Wire format is camelCase JSON, matching what the transport layer
//!   accepts and returns.
//! - Sanitization and storage logic live in the `service` crate; these
//!   types carry no behavior beyond (de)serialization.

pub mod entry;
pub mod trash;
