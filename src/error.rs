//! Error types for the blob store

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BlobError>;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("key {field} not found in: {record}")]
    KeyNotFound { field: String, record: String },

    #[error("unsupported value type for key {field}: {kind}")]
    UnsupportedValue { field: String, kind: &'static str },

    #[error("Invalid key pattern: {0}")]
    InvalidPattern(#[from] regex_lite::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot open backend at {path}: {reason}")]
    BackendOpen { path: PathBuf, reason: String },

    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Duplicate key rejected by backend: {0}")]
    DuplicateKey(String),

    #[error("Backend '{0}' does not support lookups")]
    LookupUnsupported(&'static str),

    #[error("Value {0} does not fit into an 8-byte varint slot")]
    ValueOverflow(u64),

    #[error("Corrupt index value: {0}")]
    CorruptValue(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Range {offset}+{length} exceeds blob size {size}")]
    OutOfRange { offset: u64, length: u64, size: u64 },

    #[error("Pipeline {0} thread panicked")]
    WorkerPanicked(&'static str),
}

impl BlobError {
    /// Stable error code for callers that report errors over a wire.
    pub fn code(&self) -> &'static str {
        match self {
            BlobError::Parse(_) => "PARSE_ERROR",
            BlobError::KeyNotFound { .. } => "KEY_NOT_FOUND",
            BlobError::UnsupportedValue { .. } => "UNSUPPORTED_VALUE",
            BlobError::InvalidPattern(_) | BlobError::InvalidConfig(_) => "INVALID_CONFIG",
            BlobError::BackendOpen { .. } => "BACKEND_OPEN",
            BlobError::DuplicateKey(_) => "DUPLICATE_KEY",
            BlobError::Sled(_) | BlobError::Sqlite(_) => "BACKEND_ERROR",
            BlobError::LookupUnsupported(_) => "LOOKUP_UNSUPPORTED",
            BlobError::ValueOverflow(_) | BlobError::CorruptValue(_) => "CORRUPT_VALUE",
            BlobError::Io(_) => "IO_ERROR",
            BlobError::OutOfRange { .. } => "OUT_OF_RANGE",
            BlobError::WorkerPanicked(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error came from turning a record into a key.
    pub fn is_extraction(&self) -> bool {
        matches!(
            self,
            BlobError::Parse(_) | BlobError::KeyNotFound { .. } | BlobError::UnsupportedValue { .. }
        )
    }
}
