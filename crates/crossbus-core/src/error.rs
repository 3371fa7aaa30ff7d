//! Shared error types across crossbus crates.

use thiserror::Error;

use crate::payload::TypeTag;

/// Shared result type.
pub type Result<T> = std::result::Result<T, BusError>;

/// Terminal failure of one send operation, delivered through its completion
/// handle. Exactly one of these (or a success) resolves each operation.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// Unary send saw no response within its deadline.
    #[error("no response within the deadline")]
    ResponseTimeout,
    /// A global send was outstanding while a connection reported broken.
    #[error("connection broken")]
    ConnectionBroken,
    /// The caller cancelled the operation.
    #[error("cancelled by caller")]
    Cancelled,
    /// A remote receiver failed and exception forwarding is enabled.
    /// Carries display text and the remote type tag for diagnostics only;
    /// the original error is not reconstructable.
    #[error("remote receiver failed: {display}")]
    Remote {
        display: String,
        tag: Option<TypeTag>,
    },
}

impl SendError {
    /// Stable short code used in logs and transport-level diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            SendError::ResponseTimeout => "RESPONSE_TIMEOUT",
            SendError::ConnectionBroken => "CONNECTION_BROKEN",
            SendError::Cancelled => "CANCELLED",
            SendError::Remote { .. } => "REMOTE_EXCEPTION",
        }
    }
}

/// Unified infrastructure error used by core and runtime.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bad config: {0}")]
    BadConfig(String),
    #[error("receiver failed: {0}")]
    Receiver(String),
    #[error("transport send failed: {0}")]
    Transport(String),
    #[error("internal: {0}")]
    Internal(String),
}
