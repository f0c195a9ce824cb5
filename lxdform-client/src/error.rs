//! Client error types.

use thiserror::Error;

/// Errors returned by daemon calls.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The daemon answered 404.
    #[error("not found: {0}")]
    NotFound(String),

    /// The daemon rejected a write because the object changed since it was read.
    #[error("ETag mismatch: {0}")]
    EtagMismatch(String),

    /// Any other error status reported by the daemon.
    #[error("{message}")]
    Status { code: u16, message: String },

    /// Connection or protocol failure below the daemon API.
    #[error("transport error: {0}")]
    Transport(String),

    /// The daemon returned a body we could not decode.
    #[error("invalid response: {0}")]
    Decode(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The caller cancelled while waiting on an operation.
    #[error("operation {0} cancelled by caller")]
    Cancelled(String),

    #[error("timed out waiting for operation {0}")]
    Timeout(String),

    #[error("operation {id} failed: {message}")]
    OperationFailed { id: String, message: String },
}

impl ClientError {
    /// True if the daemon reported the object as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    /// HTTP-style status code, if the error came from the daemon.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ClientError::NotFound(_) => Some(404),
            ClientError::EtagMismatch(_) => Some(412),
            ClientError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
