//! Remote storage access
//!
//! Geometry payloads and model metadata live on remote storage and are
//! addressed by opaque string file ids. Everything beyond "retrieve a byte blob
//! by identifier" is left to the `RemoteStorage` implementation.

pub mod storage;

pub use storage::{RemoteStorage, HttpStorage, FileStorage, MemoryStorage};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("File not found: {file_id}")]
    NotFound { file_id: String },

    #[error("Invalid file id: {file_id}")]
    InvalidFileId { file_id: String },

    #[error("HTTP request for {file_id} failed: {reason}")]
    Http { file_id: String, reason: String },

    #[error("I/O error reading {file_id}: {reason}")]
    Io { file_id: String, reason: String },
}

pub type StorageResult<T> = Result<T, StorageError>;
