//! OCPP protocol shared types
//!
//! Value objects of the wire protocol that do not belong to a single
//! message: protocol versions, error codes and the payload contracts.

pub mod error_code;
pub mod message;
pub mod version;

pub use error_code::ErrorCode;
pub use message::{OcppConfirmation, OcppRequest};
pub use version::OcppVersion;
