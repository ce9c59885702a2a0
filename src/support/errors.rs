use serde_json::Value;
use thiserror::Error;

use crate::domain::ErrorCode;
use crate::support::payload::PayloadError;

/// Why an outbound call did not produce a confirmation.
///
/// Every failure a caller of `Session::send` can observe arrives as one of
/// these through the call's future; nothing escapes the session loop.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallFailure {
    #[error("Another call is already outstanding on this session")]
    Busy,

    #[error("Session is closing")]
    ConnectionClosing,

    #[error("No response before the deadline")]
    Timeout,

    #[error("CallError {code}: {description}")]
    CallError {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    #[error("Outgoing request rejected: {0}")]
    InvalidRequest(PayloadError),

    #[error("Invalid confirmation: {0}")]
    InvalidConfirmation(PayloadError),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl CallFailure {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Busy)
    }
}

/// Infrastructure failure raised by a request handler.
///
/// Domain outcomes such as "Rejected" are confirmation fields, not errors.
/// The message is logged locally and never sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Internal(String),

    #[error("Action not supported by this deployment")]
    NotSupported,

    #[error("Security violation: {0}")]
    Security(String),
}

impl HandlerError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Internal(_) => ErrorCode::InternalError,
            Self::NotSupported => ErrorCode::NotSupported,
            Self::Security(_) => ErrorCode::SecurityError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Action {0} is already registered")]
    DuplicateAction(&'static str),
}

/// WebSocket transport failure (listener, handshake or client connect).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Peer did not accept subprotocol {requested}")]
    SubprotocolRejected { requested: &'static str },

    #[error("No dispatcher registered for {0}")]
    UnsupportedVersion(crate::domain::OcppVersion),
}
