//! Typed payload decoding and validation
//!
//! Turns raw `serde_json::Value` payloads into typed messages and back, and
//! reports every failure as a [`PayloadError`] carrying the OCPP error code,
//! the offending field and the violated constraint, so a precise
//! `CallError` can be built from it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::domain::ErrorCode;

/// Structured decode / validation failure.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {reason}")]
pub struct PayloadError {
    pub code: ErrorCode,
    /// Dotted path of the offending field (`idTagInfo.status`, `meterValue[0].timestamp`).
    pub field: Option<String>,
    /// Violated rule (`length`, `range`, `required`, `type`...).
    pub constraint: Option<String>,
    /// Received value, when the validator reported it.
    pub value: Option<Value>,
    pub reason: String,
}

impl PayloadError {
    fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            field: None,
            constraint: None,
            value: None,
            reason: reason.into(),
        }
    }

    /// `errorDetails` object for the outgoing `CallError`.
    pub fn details(&self) -> Value {
        let mut details = serde_json::Map::new();
        if let Some(field) = &self.field {
            details.insert("field".into(), json!(field));
        }
        if let Some(constraint) = &self.constraint {
            details.insert("constraint".into(), json!(constraint));
        }
        if let Some(value) = &self.value {
            details.insert("value".into(), value.clone());
        }
        Value::Object(details)
    }
}

/// Decode a raw payload into `T`.
pub fn decode_payload<T: DeserializeOwned>(payload: Value) -> Result<T, PayloadError> {
    if !payload.is_object() {
        return Err(PayloadError::new(
            ErrorCode::FormationViolation,
            "payload is not a JSON object",
        ));
    }
    serde_json::from_value(payload).map_err(classify_serde_error)
}

/// Run `T`'s validation rules.
pub fn validate_payload<T: Validate>(payload: &T) -> Result<(), PayloadError> {
    payload.validate().map_err(|errors| first_violation(&errors))
}

/// Encode a typed payload. Failing here is always a local bug.
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<Value, PayloadError> {
    serde_json::to_value(payload)
        .map_err(|e| PayloadError::new(ErrorCode::InternalError, e.to_string()))
}

fn classify_serde_error(err: serde_json::Error) -> PayloadError {
    let message = err.to_string();

    if message.starts_with("missing field") {
        let mut error = PayloadError::new(ErrorCode::OccurrenceConstraintViolation, &message);
        error.field = backticked(&message);
        error.constraint = Some("required".into());
        return error;
    }

    if message.starts_with("invalid type")
        || message.starts_with("invalid value")
        || message.starts_with("unknown variant")
    {
        let mut error = PayloadError::new(ErrorCode::TypeConstraintViolation, &message);
        error.constraint = Some("type".into());
        return error;
    }

    PayloadError::new(ErrorCode::FormationViolation, message)
}

/// First text between backticks, serde's way of quoting field names.
fn backticked(message: &str) -> Option<String> {
    let mut parts = message.split('`');
    parts.next()?;
    parts.next().map(str::to_string)
}

fn first_violation(errors: &ValidationErrors) -> PayloadError {
    let mut flat = Vec::new();
    flatten(errors, String::new(), &mut flat);
    flat.sort_by(|a, b| a.0.cmp(&b.0));

    match flat.into_iter().next() {
        Some((field, error)) => {
            let code = if error.code == "required" {
                ErrorCode::OccurrenceConstraintViolation
            } else {
                ErrorCode::PropertyConstraintViolation
            };
            PayloadError {
                code,
                reason: format!("{} violates {}", field, error.code),
                field: Some(field),
                constraint: Some(error.code.to_string()),
                value: error.params.get("value").cloned(),
            }
        }
        None => PayloadError::new(ErrorCode::PropertyConstraintViolation, "validation failed"),
    }
}

/// Validator reports Rust field names; message types serialize them
/// camelCase.
fn wire_name(field: &str) -> String {
    let mut name = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = !name.is_empty();
        } else if upper {
            name.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            name.push(c);
        }
    }
    name
}

fn flatten<'a>(
    errors: &'a ValidationErrors,
    prefix: String,
    out: &mut Vec<(String, &'a ValidationError)>,
) {
    for (field, kind) in errors.errors() {
        let field = wire_name(field);
        let path = if prefix.is_empty() {
            field
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                out.extend(list.iter().map(|e| (path.clone(), e)));
            }
            ValidationErrorsKind::Struct(inner) => flatten(inner, path, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    flatten(inner, format!("{}[{}]", path, index), out);
                }
            }
        }
    }
}
