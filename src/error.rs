//! Crate-wide error type.
//!
//! `StorageAdapter` implementations surface failures as an opaque,
//! human-readable message (spec: "an adapter call either fulfills its
//! contract or fails with an error carrying a human-readable message").
//! Everything else in the crate propagates `Error` unchanged except the
//! SyncManager, which catches at sync-round granularity (see `sync::types`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("adapter operation failed: {0}")]
    Adapter(String),

    #[error("adapter is unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("store \"{0}\" does not exist")]
    NoSuchStore(String),

    #[error("sync view serialization failed: {0}")]
    ViewSerialize(#[from] serde_json::Error),

    #[error("sync view is corrupt: {0}")]
    ViewCorrupt(String),

    #[error("record \"{store}/{id}\" not found")]
    NotFound { store: String, id: String },

    #[error("attachment \"{0}\" not found")]
    AttachmentNotFound(String),

    #[error("sync is already in progress")]
    SyncInProgress,
}

pub type Result<T> = std::result::Result<T, Error>;
