//! OCPP-J envelope
//!
//! Both protocol generations share the same JSON array framing:
//!
//! ```text
//! [2, "<uniqueId>", "<action>", {payload}]                              Call
//! [3, "<uniqueId>", {payload}]                                          CallResult
//! [4, "<uniqueId>", "<errorCode>", "<errorDescription>", {errorDetails}] CallError
//! ```
//!
//! Payloads are left as [`serde_json::Value`]; the registry (calls) and
//! the pending-call responder (results) decide their concrete type.

use serde_json::{json, Value};
use thiserror::Error;

use crate::domain::{ErrorCode, OcppVersion};

/// Leading number of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageType {
    /// Minimum array length a frame of this type must have. A `CallError`
    /// may omit its details object.
    fn min_len(self) -> usize {
        match self {
            Self::Call | Self::CallError => 4,
            Self::CallResult => 3,
        }
    }
}

impl TryFrom<u64> for MessageType {
    type Error = FrameError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::Call),
            3 => Ok(Self::CallResult),
            4 => Ok(Self::CallError),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }
}

/// One decoded OCPP-J message.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        /// Wire spelling as received; see [`ErrorCode::parse`].
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

fn string_at(fields: &[Value], index: usize, what: &'static str) -> Result<String, FrameError> {
    fields[index]
        .as_str()
        .map(str::to_owned)
        .ok_or(FrameError::NotAString(what))
}

impl OcppFrame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::Json(e.to_string()))?;
        let Value::Array(fields) = value else {
            return Err(FrameError::NotAnArray);
        };
        let Some(first) = fields.first() else {
            return Err(FrameError::Empty);
        };
        let kind = MessageType::try_from(first.as_u64().ok_or(FrameError::BadMessageType)?)?;

        if fields.len() < kind.min_len() {
            return Err(FrameError::TooShort {
                kind,
                expected: kind.min_len(),
                got: fields.len(),
            });
        }
        let unique_id = string_at(&fields, 1, "uniqueId")?;

        let frame = match kind {
            MessageType::Call => Self::Call {
                unique_id,
                action: string_at(&fields, 2, "action")?,
                payload: fields[3].clone(),
            },
            // Some stations send `null` for an empty confirmation.
            MessageType::CallResult => Self::CallResult {
                unique_id,
                payload: match &fields[2] {
                    Value::Null => json!({}),
                    payload => payload.clone(),
                },
            },
            MessageType::CallError => Self::CallError {
                unique_id,
                error_code: string_at(&fields, 2, "errorCode")?,
                error_description: fields[3].as_str().unwrap_or_default().to_owned(),
                error_details: fields.get(4).cloned().unwrap_or_else(|| json!({})),
            },
        };
        Ok(frame)
    }

    /// Message type and unique id of a frame that failed [`parse`](Self::parse),
    /// when both are still readable.
    pub fn salvage_header(text: &str) -> Option<(u64, String)> {
        let value: Value = serde_json::from_str(text).ok()?;
        let fields = value.as_array()?;
        Some((
            fields.first()?.as_u64()?,
            fields.get(1)?.as_str()?.to_owned(),
        ))
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Call { .. } => MessageType::Call,
            Self::CallResult { .. } => MessageType::CallResult,
            Self::CallError { .. } => MessageType::CallError,
        }
    }

    pub fn serialize(&self) -> String {
        let kind = self.message_type() as u8;
        let value = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => json!([kind, unique_id, action, payload]),
            Self::CallResult { unique_id, payload } => json!([kind, unique_id, payload]),
            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => json!([kind, unique_id, error_code, error_description, error_details]),
        };
        value.to_string()
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    pub fn call(unique_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self::Call {
            unique_id: unique_id.into(),
            action: action.into(),
            payload,
        }
    }

    pub fn call_result(unique_id: impl Into<String>, payload: Value) -> Self {
        Self::CallResult {
            unique_id: unique_id.into(),
            payload,
        }
    }

    /// `CallError` for `code`, spelled for `version`, with the generic
    /// description. Internal error text never goes on the wire.
    pub fn error_response(
        unique_id: impl Into<String>,
        code: ErrorCode,
        version: OcppVersion,
        error_details: Value,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: code.as_wire(version).to_owned(),
            error_description: code.default_description().to_owned(),
            error_details,
        }
    }

    pub fn is_call(&self) -> bool {
        self.message_type() == MessageType::Call
    }

    pub fn is_call_result(&self) -> bool {
        self.message_type() == MessageType::CallResult
    }
}

// ── Codec seam ─────────────────────────────────────────────────

/// Envelope codec between the logical frame and transport text.
///
/// The session and dispatcher only ever see [`OcppFrame`], so another
/// binding (e.g. SOAP headers carrying message id / action / relatesTo)
/// plugs in here without touching correlation or dispatch.
pub trait WireCodec: Send + Sync + 'static {
    fn encode(&self, frame: &OcppFrame) -> String;
    fn decode(&self, text: &str) -> Result<OcppFrame, FrameError>;
}

/// OCPP-J array framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl WireCodec for JsonCodec {
    fn encode(&self, frame: &OcppFrame) -> String {
        frame.serialize()
    }

    fn decode(&self, text: &str) -> Result<OcppFrame, FrameError> {
        OcppFrame::parse(text)
    }
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Invalid JSON: {0}")]
    Json(String),
    #[error("Frame is not a JSON array")]
    NotAnArray,
    #[error("Frame array is empty")]
    Empty,
    #[error("Message type is not a number")]
    BadMessageType,
    #[error("Unknown message type {0}")]
    UnknownMessageType(u64),
    #[error("{kind:?} needs {expected} elements, got {got}")]
    TooShort {
        kind: MessageType,
        expected: usize,
        got: usize,
    },
    #[error("{0} is not a string")]
    NotAString(&'static str),
}

impl FrameError {
    /// Error code used when the broken frame can still be answered.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnknownMessageType(_) => ErrorCode::MessageTypeNotSupported,
            Self::TooShort { .. } => ErrorCode::ProtocolError,
            _ => ErrorCode::FormationViolation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_fields_are_extracted() {
        let frame = OcppFrame::parse(r#"[2,"19223201","Authorize",{"idTag":"ABC123"}]"#).unwrap();
        assert_eq!(
            frame,
            OcppFrame::call("19223201", "Authorize", json!({"idTag": "ABC123"}))
        );
        assert_eq!(frame.message_type(), MessageType::Call);
    }

    #[test]
    fn null_result_payload_becomes_empty_object() {
        let frame = OcppFrame::parse(r#"[3,"42",null]"#).unwrap();
        assert_eq!(frame, OcppFrame::call_result("42", json!({})));
    }

    #[test]
    fn call_error_details_are_optional() {
        let frame = OcppFrame::parse(r#"[4,"42","GenericError","boom"]"#).unwrap();
        match frame {
            OcppFrame::CallError {
                error_code,
                error_description,
                error_details,
                ..
            } => {
                assert_eq!(error_code, "GenericError");
                assert_eq!(error_description, "boom");
                assert_eq!(error_details, json!({}));
            }
            other => panic!("expected CallError, got {:?}", other),
        }
    }

    #[test]
    fn structural_errors_map_to_codes() {
        let cases = [
            ("[2,", ErrorCode::FormationViolation),
            (r#"{"a":1}"#, ErrorCode::FormationViolation),
            ("[]", ErrorCode::FormationViolation),
            (r#"["2","x","Heartbeat",{}]"#, ErrorCode::FormationViolation),
            (r#"[2,17,"Heartbeat",{}]"#, ErrorCode::FormationViolation),
            (r#"[9,"x",{}]"#, ErrorCode::MessageTypeNotSupported),
            (r#"[2,"x","Heartbeat"]"#, ErrorCode::ProtocolError),
        ];
        for (text, code) in cases {
            let err = OcppFrame::parse(text).unwrap_err();
            assert_eq!(err.error_code(), code, "{}", text);
        }
    }

    #[test]
    fn salvage_header_needs_type_and_id() {
        assert_eq!(
            OcppFrame::salvage_header(r#"[2,"77","Authorize"]"#),
            Some((2, "77".to_string()))
        );
        assert_eq!(OcppFrame::salvage_header(r#"[2,77]"#), None);
        assert_eq!(OcppFrame::salvage_header("garbage"), None);
    }

    #[test]
    fn codec_writes_compact_arrays() {
        let codec = JsonCodec;
        let frame = OcppFrame::call_result("7", json!({"currentTime": "2024-05-01T10:00:00Z"}));
        let text = codec.encode(&frame);
        assert_eq!(text, r#"[3,"7",{"currentTime":"2024-05-01T10:00:00Z"}]"#);
        assert!(codec.decode(&text).unwrap().is_call_result());
    }

    #[test]
    fn error_response_uses_version_spelling() {
        let code = ErrorCode::FormationViolation;
        let v201 = OcppFrame::error_response("id3", code, OcppVersion::V201, json!({}));
        let v16 = OcppFrame::error_response("id3", code, OcppVersion::V16, json!({}));
        assert!(v201.serialize().contains(r#""FormatViolation""#));
        assert!(v16.serialize().contains(r#""FormationViolation""#));
    }
}
