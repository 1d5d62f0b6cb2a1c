//! Storage layer error types.

use crate::storage::page::PageId;
use thiserror::Error;

/// Errors that can occur in the storage and index layers.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Feature not supported: {0}")]
    FeatureNotSupported(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("File corrupted: {0}")]
    FileCorrupted(String),

    #[error("Duplicate key violates unique index {index}: {row}")]
    DuplicateKey { index: String, row: String },

    #[error("Row not found when deleting from index {index}: {row}")]
    RowNotFoundWhenDeleting { index: String, row: String },

    #[error("Row not found in table {table}: key {key}")]
    RowNotFound { table: u32, key: i64 },

    #[error("Row of {size} bytes does not fit into page {page_id} ({page_size} bytes)")]
    RowTooLarge {
        page_id: PageId,
        size: usize,
        page_size: usize,
    },

    #[error("Object is closed")]
    ObjectClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl StorageError {
    /// Shorthand for a corruption error about a specific page.
    pub fn corrupted(page_id: PageId, reason: impl std::fmt::Display) -> Self {
        StorageError::FileCorrupted(format!("page {}: {}", page_id, reason))
    }

    /// Whether this error signals on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StorageError::FileCorrupted(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
