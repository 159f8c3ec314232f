//! Error types shared by the backend seam and the operation modules.

use thiserror::Error;

/// Failure of a call against the data backend (hosted or local).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// The request never produced an HTTP response (DNS, connect, timeout).
    #[error("{0}")]
    Network(String),
    /// The backend answered with a non-success status.
    #[error("{message} (HTTP {status})")]
    Http { status: u16, message: String },
    /// The backend answered but the payload could not be interpreted.
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("backend not configured: {0}")]
    Config(String),
    #[error("{0} not found")]
    NotFound(String),
    /// The acting role lacks the permission the write requires.
    #[error("permission denied: {0}")]
    Forbidden(String),
    /// Local SQLite failure.
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl BackendError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Connectivity problems, as opposed to the backend refusing the call.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Input rejected before any network call. Messages are shown to staff as-is.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error returned by the operation modules (checkout, catalog, employees...).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PosError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl PosError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(message))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Backend(BackendError::Forbidden(message.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_message_includes_status() {
        let err = BackendError::http(409, "duplicate key value");
        assert_eq!(err.to_string(), "duplicate key value (HTTP 409)");
        assert!(!err.is_connectivity());
    }

    #[test]
    fn validation_error_is_transparent_through_pos_error() {
        let err = PosError::validation("Quantité invalide");
        assert_eq!(err.to_string(), "Quantité invalide");
    }
}
