//! Error taxonomy for the media library core.
//!
//! Errors are grouped by how the caller is expected to react:
//! transient infrastructure errors are retried where they occur,
//! capacity errors surface immediately with an actionable message,
//! and validation errors are batched before any side effect happens.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    /// The local store connection was closed or became unusable.
    /// The store discards the handle and reopens on the next attempt.
    #[error("local store connection unusable: {0}")]
    ConnectionClosed(String),

    /// Local storage is out of space. Never retried.
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A network call failed mid-flight.
    #[error("network error during {operation}: {message}")]
    Network { operation: String, message: String },

    /// The remote object store did not pass its availability probe.
    #[error("cloud storage unavailable: {0}")]
    CloudUnavailable(String),

    /// An object already exists at the target path and upsert was not requested.
    #[error("object already exists at {0}")]
    AlreadyExists(String),

    /// Input rejected before any side effect.
    #[error("validation failed for {name}: {reason}")]
    Validation { name: String, reason: String },

    /// A referenced record or assignment does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A non-transient database error.
    #[error("database error: {0}")]
    Database(rusqlite::Error),

    /// A background task panicked or was aborted.
    #[error("task failure: {0}")]
    Task(String),

    /// Terminal failure after the retry budget was spent. Carries the
    /// operation name and attempt count alongside the original error.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<MediaError>,
    },
}

impl MediaError {
    /// Whether a retry at the same layer has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MediaError::ConnectionClosed(_)
                | MediaError::Network { .. }
                | MediaError::CloudUnavailable(_)
        )
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, MediaError::QuotaExceeded(_))
    }

    pub fn validation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        MediaError::Validation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn network(operation: impl Into<String>, message: impl Into<String>) -> Self {
        MediaError::Network {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Map a rusqlite error onto the taxonomy. Busy/locked/unopenable
/// connections are transient; a full disk is a capacity error.
pub fn classify_db_error(err: rusqlite::Error) -> MediaError {
    use rusqlite::ErrorCode;

    if let rusqlite::Error::SqliteFailure(inner, ref message) = err {
        let detail = message.clone().unwrap_or_else(|| inner.to_string());
        match inner.code {
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::NotADatabase => return MediaError::ConnectionClosed(detail),
            ErrorCode::DiskFull => {
                return MediaError::QuotaExceeded(format!(
                    "{detail}. Free up space by removing unused images, then try again"
                ))
            }
            _ => {}
        }
    }
    MediaError::Database(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(MediaError::ConnectionClosed("gone".into()).is_transient());
        assert!(MediaError::network("upload", "timeout").is_transient());
        assert!(!MediaError::QuotaExceeded("full".into()).is_transient());
        assert!(!MediaError::validation("a.png", "too large").is_transient());
    }

    #[test]
    fn disk_full_becomes_quota() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            Some("database or disk is full".into()),
        );
        let classified = classify_db_error(err);
        assert!(classified.is_quota());
        assert!(classified.to_string().contains("Free up space"));
    }
}
