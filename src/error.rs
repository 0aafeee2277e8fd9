//! Typed errors for the indexing and retrieval engine.
//!
//! Engine operations return [`Result<T>`] so callers (the CLI, the HTTP tool
//! layer, embedding applications) can branch on the failure kind. Binary
//! edges such as config loading keep using `anyhow` and convert with `?`.

use thiserror::Error;

/// Errors raised by engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A file could not be parsed into index records.
    #[error("failed to parse {path}: {reason}")]
    ParseFailure { path: String, reason: String },

    /// A prompt, item, or other record does not exist.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// Caller-supplied input was rejected.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The persisted store could not be read or written.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    /// Another reindex run currently holds the run guard.
    #[error("a reindex is already running")]
    ConcurrentReindexRejected,

    /// The operation was cancelled before it committed anything.
    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            what,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn parse_failure(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ParseFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code used in HTTP error bodies and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ParseFailure { .. } => "parse_failure",
            Error::NotFound { .. } => "not_found",
            Error::Validation(_) => "validation_error",
            Error::StorageUnavailable(_) => "storage_unavailable",
            Error::ConcurrentReindexRejected => "reindex_in_progress",
            Error::Cancelled => "cancelled",
            Error::Io(_) | Error::Pattern(_) | Error::Task(_) | Error::Serialization(_) => {
                "internal"
            }
        }
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_record() {
        let err = Error::not_found("prompt", "code_review");
        assert_eq!(err.to_string(), "prompt not found: code_review");
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn validation_code_is_stable() {
        assert_eq!(Error::validation("bad").code(), "validation_error");
        assert_eq!(
            Error::ConcurrentReindexRejected.code(),
            "reindex_in_progress"
        );
    }
}
