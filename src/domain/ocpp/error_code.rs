//! OCPP-J `CallError` error codes
//!
//! The set is closed. Two codes changed spelling between protocol
//! generations, so rendering takes the session's [`OcppVersion`]:
//!
//! | code                              | 1.6                            | 2.0.1                           |
//! |-----------------------------------|--------------------------------|---------------------------------|
//! | [`ErrorCode::FormationViolation`] | `FormationViolation`           | `FormatViolation`               |
//! | [`ErrorCode::OccurrenceConstraintViolation`] | `OccurenceConstraintViolation` | `OccurrenceConstraintViolation` |

use std::fmt;

use super::OcppVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Requested action is not known by the receiver.
    NotImplemented,
    /// Requested action is recognized but not supported by the receiver.
    NotSupported,
    /// An internal error occurred and the receiver could not process the action.
    InternalError,
    /// Payload for the action is incomplete.
    ProtocolError,
    /// A security issue occurred during processing.
    SecurityError,
    /// Payload is syntactically incorrect or does not conform to the PDU structure.
    FormationViolation,
    /// A field contains a value outside of its allowed range or pattern.
    PropertyConstraintViolation,
    /// A required field is missing or an optional one is repeated.
    OccurrenceConstraintViolation,
    /// A field contains a value of the wrong data type.
    TypeConstraintViolation,
    /// The message type number is not supported (2.0.1 only).
    MessageTypeNotSupported,
    /// Content of the call is not a valid RPC request (2.0.1 only).
    RpcFrameworkError,
    /// Any other error not covered above.
    GenericError,
}

impl ErrorCode {
    /// Wire spelling of this code for the given protocol generation.
    pub fn as_wire(&self, version: OcppVersion) -> &'static str {
        match (self, version) {
            (Self::FormationViolation, OcppVersion::V16) => "FormationViolation",
            (Self::FormationViolation, OcppVersion::V201) => "FormatViolation",
            (Self::OccurrenceConstraintViolation, OcppVersion::V16) => {
                "OccurenceConstraintViolation"
            }
            (Self::OccurrenceConstraintViolation, OcppVersion::V201) => {
                "OccurrenceConstraintViolation"
            }
            // 1.6 has no equivalents, fall back to the closest code it knows.
            (Self::MessageTypeNotSupported, OcppVersion::V16) => "NotImplemented",
            (Self::RpcFrameworkError, OcppVersion::V16) => "ProtocolError",
            _ => self.canonical(),
        }
    }

    /// Version-independent name.
    pub fn canonical(&self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::MessageTypeNotSupported => "MessageTypeNotSupported",
            Self::RpcFrameworkError => "RpcFrameworkError",
            Self::GenericError => "GenericError",
        }
    }

    /// Parse any known spelling. Unknown codes map to [`ErrorCode::GenericError`].
    pub fn parse(code: &str) -> Self {
        match code {
            "NotImplemented" => Self::NotImplemented,
            "NotSupported" => Self::NotSupported,
            "InternalError" => Self::InternalError,
            "ProtocolError" => Self::ProtocolError,
            "SecurityError" => Self::SecurityError,
            "FormationViolation" | "FormatViolation" => Self::FormationViolation,
            "PropertyConstraintViolation" => Self::PropertyConstraintViolation,
            "OccurenceConstraintViolation" | "OccurrenceConstraintViolation" => {
                Self::OccurrenceConstraintViolation
            }
            "TypeConstraintViolation" => Self::TypeConstraintViolation,
            "MessageTypeNotSupported" => Self::MessageTypeNotSupported,
            "RpcFrameworkError" => Self::RpcFrameworkError,
            _ => Self::GenericError,
        }
    }

    /// Generic description put on the wire alongside the code.
    ///
    /// Internal error text never leaves the process, only these strings do.
    pub fn default_description(&self) -> &'static str {
        match self {
            Self::NotImplemented => "Requested Action is not known by receiver",
            Self::NotSupported => "Requested Action is recognized but not supported by the receiver",
            Self::InternalError => "An internal error occurred and the receiver was not able to process the requested Action successfully",
            Self::ProtocolError => "Payload for Action is incomplete",
            Self::SecurityError => "During the processing of Action a security issue occurred preventing receiver from completing the Action successfully",
            Self::FormationViolation => "Payload for Action is syntactically incorrect or not conform the PDU structure for Action",
            Self::PropertyConstraintViolation => "Payload is syntactically correct but at least one field contains an invalid value",
            Self::OccurrenceConstraintViolation => "Payload for Action is syntactically correct but at least one of the fields violates occurrence constraints",
            Self::TypeConstraintViolation => "Payload for Action is syntactically correct but at least one of the fields violates data type constraints",
            Self::MessageTypeNotSupported => "A message with a Message Type Number received that is not supported by this implementation",
            Self::RpcFrameworkError => "Content of the call is not a valid RPC Request",
            Self::GenericError => "Any other error not covered by the previous ones",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v16_keeps_historic_spelling() {
        assert_eq!(
            ErrorCode::OccurrenceConstraintViolation.as_wire(OcppVersion::V16),
            "OccurenceConstraintViolation"
        );
        assert_eq!(
            ErrorCode::FormationViolation.as_wire(OcppVersion::V16),
            "FormationViolation"
        );
    }

    #[test]
    fn v201_spelling() {
        assert_eq!(
            ErrorCode::FormationViolation.as_wire(OcppVersion::V201),
            "FormatViolation"
        );
        assert_eq!(
            ErrorCode::NotImplemented.as_wire(OcppVersion::V201),
            "NotImplemented"
        );
    }

    #[test]
    fn parse_accepts_all_spellings() {
        assert_eq!(
            ErrorCode::parse("OccurenceConstraintViolation"),
            ErrorCode::OccurrenceConstraintViolation
        );
        assert_eq!(ErrorCode::parse("FormatViolation"), ErrorCode::FormationViolation);
        assert_eq!(ErrorCode::parse("Bogus"), ErrorCode::GenericError);
    }
}
