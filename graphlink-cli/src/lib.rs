//! Library half of the `graphlink` CLI, shared with its integration tests.

pub mod config;
pub mod probe;
