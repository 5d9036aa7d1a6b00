use std::fmt;
use thiserror::Error;

/// Errors raised by the payment gateway
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PaymentError {
    /// The client-credentials exchange was rejected by the provider
    #[error("Authentication failed: {status}")]
    Authentication {
        /// HTTP status returned by the token endpoint
        status: u16,
        /// Raw response body, kept for diagnostics
        body: String,
    },

    /// The provider refused to create the payment
    #[error("Payment creation failed ({status}): {message}")]
    PaymentCreation { status: u16, message: String },

    #[error("Status check failed: {status}")]
    StatusCheck { status: u16 },

    #[error("Cancellation failed: {status}")]
    Cancellation { status: u16 },

    /// Polling ended without the payment reaching a terminal state
    #[error("Payment verification timeout after {attempts} attempts")]
    VerificationTimeout { attempts: u32 },

    /// Polling was stopped by the caller
    #[error("Payment verification cancelled")]
    Cancelled,

    /// The request never produced an HTTP response
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider answered with a body that could not be decoded
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl PaymentError {
    /// HTTP status attached to the error, if the provider answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            PaymentError::Authentication { status, .. }
            | PaymentError::PaymentCreation { status, .. }
            | PaymentError::StatusCheck { status }
            | PaymentError::Cancellation { status } => Some(*status),
            _ => None,
        }
    }
}

/// Failure reported by a remote store implementation
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct RemoteError {
    /// HTTP-like status code when the backend provides one
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for RemoteError {
    fn from(err: rusqlite::Error) -> Self {
        RemoteError::new(err.to_string())
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::new(format!("Document encoding error: {err}"))
    }
}

/// Kind of optimistic write that failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOp {
    Add,
    Update,
    Delete,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOp::Add => write!(f, "add"),
            WriteOp::Update => write!(f, "update"),
            WriteOp::Delete => write!(f, "delete"),
        }
    }
}

/// What the cache did to undo a failed optimistic write
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RollbackOutcome {
    PlaceholderRemoved,
    SnapshotRestored { index: usize },
    Reinserted { index: usize },
    /// A reload already brought the record back, so it was left in place
    AlreadyPresent,
    /// The record was not cached, so nothing had been applied locally
    NothingToRevert,
}

/// Errors raised by the entity caches
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Bulk load failed; the cached collection was left untouched
    #[error("Fetch error: {0}")]
    Fetch(RemoteError),

    /// A remote write failed after the local state was reverted
    #[error("Write error during {op}: {source}")]
    Write {
        op: WriteOp,
        source: RemoteError,
        rollback: RollbackOutcome,
    },

    #[error("{collection} record not found: {id}")]
    NotFound { collection: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

impl StoreError {
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Fetch(source) | StoreError::Write { source, .. } => source.status,
            _ => None,
        }
    }
}

/// Error types for the student records SDK
#[derive(Error, Debug)]
pub enum SdkError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Error related to the local storage backend
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Generic error with a message
    #[error("Generic error: {0}")]
    GenericError(String),
}

impl From<RemoteError> for SdkError {
    fn from(err: RemoteError) -> Self {
        SdkError::StorageError(err.to_string())
    }
}

impl From<rusqlite::Error> for SdkError {
    fn from(err: rusqlite::Error) -> Self {
        SdkError::StorageError(err.to_string())
    }
}

impl From<std::io::Error> for SdkError {
    fn from(err: std::io::Error) -> Self {
        SdkError::GenericError(err.to_string())
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::GenericError(err.to_string())
    }
}
