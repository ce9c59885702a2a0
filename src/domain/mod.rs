//! Core protocol vocabulary: versions, error codes, payload contracts and
//! session identity. Nothing here performs I/O.

pub mod ocpp;
pub mod session;

pub use ocpp::{ErrorCode, OcppConfirmation, OcppRequest, OcppVersion};
pub use session::{Role, SessionId, SessionState};
