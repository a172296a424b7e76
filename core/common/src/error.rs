//! Common error types for SpanStore.

use thiserror::Error;

/// Top-level error type for SpanStore operations.
///
/// The variants double as the retry policy: only [`Error::StorageProvider`]
/// and [`Error::Io`] are considered transient.
#[derive(Debug, Error)]
pub enum Error {
    /// Space or content item does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Bytes received do not hash to the expected checksum.
    #[error("Checksum mismatch for {context}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    /// Data is structurally inconsistent (wrong length, malformed manifest).
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Transient backend fault.
    #[error("Storage provider error: {0}")]
    StorageProvider(String),

    /// Task name not registered with the adapter.
    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    /// Backend rejected the credentials.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation was cancelled before it completed.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A multi-part operation failed part way through.
    ///
    /// `last_completed` is the highest ordinal that was fully committed
    /// (chunking) or delivered (stitching), if any.
    #[error("{operation} failed after ordinal {last_completed:?}: {source}")]
    Partial {
        operation: &'static str,
        last_completed: Option<u32>,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap an error with the progress of a multi-part operation.
    pub fn partial(operation: &'static str, last_completed: Option<u32>, source: Error) -> Self {
        Error::Partial {
            operation,
            last_completed,
            source: Box::new(source),
        }
    }

    /// The underlying error, looking through any [`Error::Partial`] wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Partial { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether a bounded automatic retry may be attempted.
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), Error::StorageProvider(_) | Error::Io(_))
    }

    /// Whether the error signals corrupted or inconsistent data.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self.root(),
            Error::ChecksumMismatch { .. } | Error::Integrity(_)
        )
    }

    /// Whether the error means the addressed resource is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound(_))
    }

    /// Progress recorded by an [`Error::Partial`], if this is one.
    pub fn last_completed(&self) -> Option<u32> {
        match self {
            Error::Partial { last_completed, .. } => *last_completed,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(Error::StorageProvider("503".to_string()).is_retryable());
        assert!(Error::Io(std::io::Error::other("reset")).is_retryable());
        assert!(!Error::Authentication("bad key".to_string()).is_retryable());
        assert!(!Error::UnsupportedAction("x".to_string()).is_retryable());

        let mismatch = Error::ChecksumMismatch {
            context: "chunk".to_string(),
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert!(!mismatch.is_retryable());
        assert!(mismatch.is_integrity());
    }

    #[test]
    fn test_partial_looks_through_to_root() {
        let err = Error::partial("stitch", Some(2), Error::NotFound("c".to_string()));
        assert!(err.is_not_found());
        assert!(!err.is_integrity());
        assert_eq!(err.last_completed(), Some(2));
        assert!(matches!(err.root(), Error::NotFound(_)));
    }

    #[test]
    fn test_partial_display_mentions_progress() {
        let err = Error::partial("chunk", None, Error::Cancelled("stop".to_string()));
        let message = err.to_string();
        assert!(message.contains("chunk failed after ordinal None"));
        assert!(message.contains("Cancelled"));
    }
}
