//! Shared utilities for the examples-store workspace.

pub mod utils;
