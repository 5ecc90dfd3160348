//! Error types for world-sync.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Remote console error: {0}")]
    Console(String),

    #[error("Object storage error: {0}")]
    Storage(String),

    #[error("Object storage rejected request: {0}")]
    Rejected(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Upload verification failed: {0}")]
    Verification(String),

    #[error("Another run holds the lock: {0}")]
    Locked(String),
}

impl SyncError {
    /// Transient failures worth retrying against the object store.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SyncError::Storage(_) | SyncError::Io(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
