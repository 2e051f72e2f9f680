//! Error taxonomy shared by the OTP flow, the session controller and the note cache.
//!
//! Only `Unauthorized` carries a side effect (the session is cleared and the
//! note cache invalidated). Every other kind is surfaced to the caller and
//! leaves state where it was before the call.

use serde::Serialize;
use thiserror::Error;

use crate::remote::RemoteError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Rejected by server: {0}")]
    RemoteRejection(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Already in progress: {0}")]
    AlreadyInProgress(&'static str),

    #[error("Network failure: {0}")]
    TransportFailure(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Stable, data-free discriminant of [`ClientError`] for UI mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    RemoteRejection,
    Unauthorized,
    AlreadyInProgress,
    TransportFailure,
    InvalidState,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::RemoteRejection => "RemoteRejection",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::AlreadyInProgress => "AlreadyInProgress",
            ErrorKind::TransportFailure => "TransportFailure",
            ErrorKind::InvalidState => "InvalidState",
            ErrorKind::Storage => "StorageError",
        }
    }
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Validation(_) => ErrorKind::Validation,
            ClientError::RemoteRejection(_) => ErrorKind::RemoteRejection,
            ClientError::Unauthorized(_) => ErrorKind::Unauthorized,
            ClientError::AlreadyInProgress(_) => ErrorKind::AlreadyInProgress,
            ClientError::TransportFailure(_) => ErrorKind::TransportFailure,
            ClientError::InvalidState(_) => ErrorKind::InvalidState,
            ClientError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether the error must tear down the current session.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_))
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        ClientError::Validation(msg.into())
    }
}

impl From<RemoteError> for ClientError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Rejected(reason) => ClientError::RemoteRejection(reason),
            RemoteError::Unauthorized(reason) => ClientError::Unauthorized(reason),
            RemoteError::Transport(reason) => ClientError::TransportFailure(reason),
        }
    }
}
