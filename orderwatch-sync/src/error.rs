//! Error types for orderwatch-sync.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Failures a sync cycle can end in.
///
/// These never cross the engine boundary as `Err`; the engine records the
/// latest one as `last_error` and keeps serving the previous snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The fetch did not resolve within the configured timeout.
    #[error("order fetch timed out after {}ms", .after.as_millis())]
    FetchTimeout { after: Duration },

    /// Network or backend failure reported by the order source.
    #[error("order fetch failed: {0}")]
    FetchFailed(String),

    /// The push channel failed or was closed by the server.
    #[error("subscription error: {0}")]
    Subscription(String),

    /// Anything else (panicked fetch task, undecodable payload, ...).
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Copyable discriminant of [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FetchTimeout,
    FetchFailed,
    SubscriptionError,
    UnexpectedError,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::FetchTimeout { .. } => ErrorKind::FetchTimeout,
            SyncError::FetchFailed(_) => ErrorKind::FetchFailed,
            SyncError::Subscription(_) => ErrorKind::SubscriptionError,
            SyncError::Unexpected(_) => ErrorKind::UnexpectedError,
        }
    }
}

/// A notice could not be displayed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("notice not delivered: {0}")]
pub struct NotifyError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_one_to_one() {
        assert_eq!(
            SyncError::FetchTimeout {
                after: Duration::from_secs(1)
            }
            .kind(),
            ErrorKind::FetchTimeout
        );
        assert_eq!(
            SyncError::FetchFailed("503".into()).kind(),
            ErrorKind::FetchFailed
        );
        assert_eq!(
            SyncError::Subscription("closed".into()).kind(),
            ErrorKind::SubscriptionError
        );
        assert_eq!(
            SyncError::Unexpected("boom".into()).kind(),
            ErrorKind::UnexpectedError
        );
    }

    #[test]
    fn timeout_message_reports_millis() {
        let err = SyncError::FetchTimeout {
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "order fetch timed out after 1500ms");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::SubscriptionError).expect("json");
        assert_eq!(json, "\"subscription_error\"");
    }
}
