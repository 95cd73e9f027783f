//! Error types shared by every state store component.

use thiserror::Error;

use crate::config::ConfigError;

/// Coarse classification of a [`StoreError`].
///
/// Callers that implement their own retry policy branch on this rather than
/// on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    InvalidArgument,
    Unavailable,
    Canceled,
    Internal,
}

impl ErrorKind {
    /// Label used for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Errors returned by state store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A ticket with this id is already stored.
    #[error("Ticket already exists: {0}")]
    AlreadyExists(String),

    /// No ticket with this id is stored.
    #[error("Ticket not found: {0}")]
    NotFound(String),

    /// Caller supplied an invalid ticket, filter, or configuration.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Backend could not be reached, timed out, or the store is closed.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The caller canceled the operation or its deadline elapsed.
    #[error("Operation canceled")]
    Canceled,

    /// Backend returned something the store could not interpret.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            StoreError::Unavailable(_) => ErrorKind::Unavailable,
            StoreError::Canceled => ErrorKind::Canceled,
            StoreError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<ConfigError> for StoreError {
    fn from(e: ConfigError) -> Self {
        StoreError::InvalidArgument(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Internal(format!("malformed ticket payload: {}", e))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy)
            | Some(ErrorCode::DatabaseLocked)
            | Some(ErrorCode::CannotOpen)
            | Some(ErrorCode::SystemIoFailure) => StoreError::Unavailable(e.to_string()),
            _ => StoreError::Internal(e.to_string()),
        }
    }
}
