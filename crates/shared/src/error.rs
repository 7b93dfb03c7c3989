//! Shared error taxonomy for the sync core.

use thiserror::Error;

/// Failures of a single request at the transport level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Unreachable endpoint, connection reset, or the bounded wait elapsed.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Authentication failures, as distinguished from authorization or
/// validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("access token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    #[error("unauthenticated")]
    Unauthenticated,
    /// The refresh token was missing or rejected.
    #[error("refresh rejected: {0}")]
    RefreshRejected(String),
}

/// Error surfaced to callers of the sync core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Authentication failed and was not recovered for this call.
    #[error("authentication failed: {0}")]
    Auth(AuthFailure),
    /// The session ended; the user must log in again.
    #[error("session expired: {0}")]
    SessionExpired(AuthFailure),
    /// Business-rule or validation rejection from the server.
    #[error("{message}")]
    Validation {
        message: String,
        code: Option<String>,
    },
    /// A query record referenced an entity missing from the entity table.
    #[error("cache consistency violated: {0}")]
    CacheConsistency(String),
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: None,
        }
    }

    /// True when the UI should route the user back to the login flow.
    pub fn requires_login(&self) -> bool {
        matches!(self, SyncError::SessionExpired(_))
    }

    /// Message suitable for a toast or inline error, falling back to
    /// `fallback` for errors whose detail is not meant for users.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            SyncError::Validation { message, .. } if !message.trim().is_empty() => message.clone(),
            SyncError::SessionExpired(_) => "Your session has expired. Please log in again.".to_string(),
            SyncError::Transport(TransportError::NetworkUnavailable(_)) => {
                format!("{fallback}: network unavailable")
            }
            _ => fallback.to_string(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
