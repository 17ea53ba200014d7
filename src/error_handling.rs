//! Error types shared by the storage layer and its configuration.

pub mod types;
