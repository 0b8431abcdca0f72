use thiserror::Error;

/// Error taxonomy for the sync engine.
///
/// The split matters for recovery behavior:
/// - `Transport` is retried internally by the connection manager and only
///   ever surfaces to consumers as a state-change event.
/// - `Request` propagates to the mutation caller after the captured
///   rollback has been applied.
/// - `Conflict` means the server no longer knows the target entity; the
///   entry is removed from the cache instead of rolled back.
/// - `Validation` marks a malformed push payload; the event is dropped
///   before it can touch the cache.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid push payload: {0}")]
    Validation(String),
}

impl SyncError {
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Transport(_) => "TRANSPORT_ERROR",
            SyncError::Request(_) => "REQUEST_ERROR",
            SyncError::Conflict(_) => "CONFLICT_ERROR",
            SyncError::Validation(_) => "VALIDATION_ERROR",
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            SyncError::Transport(err.to_string())
        } else {
            SyncError::Request(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SyncError::Transport("drop".into()).error_code(),
            "TRANSPORT_ERROR"
        );
        assert_eq!(
            SyncError::Request("500".into()).error_code(),
            "REQUEST_ERROR"
        );
        assert_eq!(
            SyncError::Conflict("gone".into()).error_code(),
            "CONFLICT_ERROR"
        );
        assert_eq!(
            SyncError::Validation("bad json".into()).error_code(),
            "VALIDATION_ERROR"
        );
    }

    #[test]
    fn test_is_conflict() {
        assert!(SyncError::Conflict("gone".into()).is_conflict());
        assert!(!SyncError::Request("500".into()).is_conflict());
    }

    #[test]
    fn test_json_error_is_validation() {
        let err = serde_json::from_str::<serde_json::Value>("{not json")
            .map_err(SyncError::from)
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }
}
