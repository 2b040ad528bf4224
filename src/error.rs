//! Error types for the dropsite engine.

use thiserror::Error;

/// Errors raised by the persistent store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Record codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Transaction aborted: {0}")]
    Transaction(String),

    #[error("Invalid stored key: {0}")]
    InvalidKey(String),
}

/// A non-success answer from the remote store.
#[derive(Debug, Clone, Error)]
#[error("Remote store returned status code: {status}. {message}")]
pub struct RemoteError {
    pub status: u16,
    pub message: String,
}

impl RemoteError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Rate limiting and server side failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        self.status == 503 || (500..600).contains(&self.status)
    }
}

/// Metadata header parse failures. Line numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataParseError {
    #[error("Malformed title block near line {line}")]
    MalformedTitle { line: usize },

    #[error("Line {line}: line directly after a title is not a key/value field (insert an empty line?)")]
    FieldExpectedAfterTitle { line: usize },

    #[error("Line {line}: decreasing indent in continuation lines")]
    DecreasingIndent { line: usize },
}

/// How a failed task should be treated by a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDisposition {
    /// Hand back to the dispatcher for another attempt.
    Retry,
    /// Log and drop; the task can never succeed.
    Drop,
    /// Unclassified failure: log with full context and drop.
    Bug,
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Remote access error: {0}")]
    RemoteAccess(#[from] RemoteError),

    #[error("Metadata parse error: {0}")]
    MetadataParse(#[from] MetadataParseError),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Tree node not found: {0}")]
    NodeNotFound(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Permanent task failure: {0}")]
    PermanentTaskFailure(String),

    #[error("Temporary task failure: {0}")]
    TemporaryTaskFailure(String),
}

impl ApiError {
    pub fn disposition(&self) -> TaskDisposition {
        match self {
            ApiError::TemporaryTaskFailure(_) => TaskDisposition::Retry,
            ApiError::RemoteAccess(e) if e.is_transient() => TaskDisposition::Retry,
            ApiError::PermanentTaskFailure(_) => TaskDisposition::Drop,
            _ => TaskDisposition::Bug,
        }
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
