//! Inbound call dispatcher
//!
//! Turns one inbound `Call` into exactly one reply frame:
//!
//! 1. look up the action (`NotImplemented` / `NotSupported`),
//! 2. decode the payload into the registered request type,
//! 3. run the request's validation rules,
//! 4. invoke the handler (panics and handler errors are contained),
//! 5. validate the confirmation before it leaves the process,
//! 6. encode the `CallResult`.
//!
//! No I/O happens here; the session transmits whatever comes back.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use super::registry::SharedActionRegistry;
use crate::domain::{ErrorCode, OcppVersion, SessionId};
use crate::support::ocpp_frame::OcppFrame;
use crate::support::payload::PayloadError;

/// Why a call could not be answered with a `CallResult`.
#[derive(Debug)]
enum DispatchFault {
    Lookup(ErrorCode),
    Request(PayloadError),
    Handler(ErrorCode),
    InvalidConfirmation,
}

impl DispatchFault {
    fn label(&self) -> &'static str {
        match self {
            Self::Lookup(_) => "unknown_action",
            Self::Request(_) => "invalid_request",
            Self::Handler(_) => "handler_error",
            Self::InvalidConfirmation => "invalid_confirmation",
        }
    }

    fn into_frame(self, unique_id: &str, version: OcppVersion) -> OcppFrame {
        match self {
            Self::Lookup(code) | Self::Handler(code) => {
                OcppFrame::error_response(unique_id, code, version, json!({}))
            }
            Self::Request(err) => {
                OcppFrame::error_response(unique_id, err.code, version, err.details())
            }
            Self::InvalidConfirmation => {
                OcppFrame::error_response(unique_id, ErrorCode::InternalError, version, json!({}))
            }
        }
    }
}

/// Routes inbound calls to their registered handlers.
#[derive(Clone)]
pub struct Dispatcher {
    registry: SharedActionRegistry,
}

impl Dispatcher {
    pub fn new(registry: SharedActionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SharedActionRegistry {
        &self.registry
    }

    /// Answer one call. Always yields a `CallResult` or a `CallError`
    /// carrying `unique_id`.
    pub async fn dispatch(
        &self,
        session: SessionId,
        unique_id: &str,
        action: &str,
        payload: Value,
    ) -> OcppFrame {
        let started = Instant::now();
        let result = self.process(session, action, payload).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(fault) => fault.label(),
        };
        // Unknown actions are peer-controlled strings, keep them out of labels.
        let action_label = if self.registry.contains(action) {
            action.to_string()
        } else {
            "unknown".to_string()
        };
        metrics::counter!("ocpp_dispatch_total", "action" => action_label.clone(), "outcome" => outcome)
            .increment(1);
        metrics::histogram!("ocpp_dispatch_seconds", "action" => action_label)
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(payload) => OcppFrame::call_result(unique_id, payload),
            Err(fault) => fault.into_frame(unique_id, self.registry.version()),
        }
    }

    async fn process(
        &self,
        session: SessionId,
        action: &str,
        payload: Value,
    ) -> Result<Value, DispatchFault> {
        let entry = self.registry.lookup(action).map_err(|code| {
            warn!(%session, action, %code, "No handler for action");
            DispatchFault::Lookup(code)
        })?;
        let feature = entry.feature();

        let request = feature.decode_request(payload).map_err(|err| {
            warn!(%session, action, error = %err, "Failed to decode request");
            DispatchFault::Request(err)
        })?;

        request.check_payload().map_err(|err| {
            warn!(
                %session,
                action,
                field = err.field.as_deref().unwrap_or("-"),
                error = %err,
                "Request failed validation"
            );
            DispatchFault::Request(err)
        })?;

        debug!(%session, action, "Invoking handler");

        let confirmation = match AssertUnwindSafe(feature.invoke(session, request))
            .catch_unwind()
            .await
        {
            Ok(Ok(confirmation)) => confirmation,
            Ok(Err(err)) => {
                error!(%session, action, error = %err, "Handler failed");
                return Err(DispatchFault::Handler(err.error_code()));
            }
            Err(_) => {
                error!(%session, action, "Handler panicked");
                return Err(DispatchFault::Handler(ErrorCode::InternalError));
            }
        };

        if let Err(err) = confirmation.check_payload() {
            error!(
                %session,
                action,
                confirmation = entry.confirmation_type,
                error = %err,
                "Handler produced an invalid confirmation"
            );
            return Err(DispatchFault::InvalidConfirmation);
        }

        confirmation.to_payload().map_err(|err| {
            error!(%session, action, error = %err, "Failed to encode confirmation");
            DispatchFault::InvalidConfirmation
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::{handler_fn, ActionRegistry};
    use crate::domain::Role;
    use crate::messages::v16;
    use crate::support::errors::HandlerError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn dispatcher_with(calls: Arc<AtomicUsize>) -> Dispatcher {
        let mut builder = ActionRegistry::builder(OcppVersion::V16, Role::CentralSystem);
        builder
            .register(handler_fn(move |_s, req: v16::AuthorizeRequest| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let status = match req.id_tag.as_str() {
                        "ABC123" => v16::AuthorizationStatus::Accepted,
                        _ => v16::AuthorizationStatus::Blocked,
                    };
                    Ok::<_, HandlerError>(v16::AuthorizeResponse {
                        id_tag_info: v16::IdTagInfo::with_status(status),
                    })
                }
            }))
            .unwrap()
            .register(handler_fn(|_s, _req: v16::HeartbeatRequest| async move {
                Err::<v16::HeartbeatResponse, _>(HandlerError::Internal(
                    "clock unavailable: /dev/rtc0".into(),
                ))
            }))
            .unwrap()
            .register(handler_fn(|_s, _req: v16::DataTransferRequest| async move {
                if true {
                    panic!("boom");
                }
                Ok::<_, HandlerError>(v16::DataTransferResponse {
                    status: v16::DataTransferStatus::Accepted,
                    data: None,
                })
            }))
            .unwrap()
            .register(handler_fn(|_s, _req: v16::StatusNotificationRequest| async move {
                Err::<v16::StatusNotificationResponse, _>(HandlerError::NotSupported)
            }))
            .unwrap()
            .register(handler_fn(|_s, _req: v16::BootNotificationRequest| async move {
                Ok::<_, HandlerError>(v16::BootNotificationResponse {
                    status: v16::RegistrationStatus::Accepted,
                    current_time: chrono::Utc::now(),
                    interval: -5,
                })
            }))
            .unwrap();
        Dispatcher::new(builder.build())
    }

    fn error_code_of(frame: &OcppFrame) -> &str {
        match frame {
            OcppFrame::CallError { error_code, .. } => error_code,
            other => panic!("expected CallError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn happy_path_returns_call_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher_with(calls.clone());
        let frame = dispatcher
            .dispatch(SessionId::new(), "1", "Authorize", json!({"idTag": "ABC123"}))
            .await;
        assert_eq!(
            frame,
            OcppFrame::call_result("1", json!({"idTagInfo": {"status": "Accepted"}}))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn domain_rejection_is_still_a_call_result() {
        let dispatcher = dispatcher_with(Arc::new(AtomicUsize::new(0)));
        let frame = dispatcher
            .dispatch(SessionId::new(), "1", "Authorize", json!({"idTag": "NOPE"}))
            .await;
        assert!(frame.is_call_result());
    }

    #[tokio::test]
    async fn unknown_action_is_not_implemented() {
        let dispatcher = dispatcher_with(Arc::new(AtomicUsize::new(0)));
        let frame = dispatcher
            .dispatch(SessionId::new(), "2", "Frobnicate", json!({}))
            .await;
        assert_eq!(frame.unique_id(), "2");
        assert_eq!(error_code_of(&frame), "NotImplemented");
    }

    #[tokio::test]
    async fn known_but_unregistered_action_is_not_supported() {
        let dispatcher = dispatcher_with(Arc::new(AtomicUsize::new(0)));
        let frame = dispatcher
            .dispatch(SessionId::new(), "3", "MeterValues", json!({}))
            .await;
        assert_eq!(error_code_of(&frame), "NotSupported");
    }

    #[tokio::test]
    async fn malformed_payload_is_formation_violation() {
        let dispatcher = dispatcher_with(Arc::new(AtomicUsize::new(0)));
        let frame = dispatcher
            .dispatch(SessionId::new(), "4", "Authorize", json!("ABC123"))
            .await;
        assert_eq!(error_code_of(&frame), "FormationViolation");
    }

    #[tokio::test]
    async fn invalid_request_never_reaches_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher_with(calls.clone());

        let too_long = dispatcher
            .dispatch(SessionId::new(), "5", "Authorize", json!({"idTag": "X".repeat(21)}))
            .await;
        assert_eq!(error_code_of(&too_long), "PropertyConstraintViolation");
        match &too_long {
            OcppFrame::CallError { error_details, .. } => {
                assert_eq!(error_details["field"], "idTag");
                assert_eq!(error_details["constraint"], "length");
            }
            _ => unreachable!(),
        }

        let missing = dispatcher
            .dispatch(SessionId::new(), "6", "Authorize", json!({}))
            .await;
        assert_eq!(error_code_of(&missing), "OccurenceConstraintViolation");

        let wrong_type = dispatcher
            .dispatch(SessionId::new(), "7", "Authorize", json!({"idTag": 42}))
            .await;
        assert_eq!(error_code_of(&wrong_type), "TypeConstraintViolation");

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_error_does_not_leak_details() {
        let dispatcher = dispatcher_with(Arc::new(AtomicUsize::new(0)));
        let frame = dispatcher
            .dispatch(SessionId::new(), "8", "Heartbeat", json!({}))
            .await;
        match frame {
            OcppFrame::CallError {
                error_code,
                error_description,
                ..
            } => {
                assert_eq!(error_code, "InternalError");
                assert!(!error_description.contains("rtc0"));
            }
            other => panic!("expected CallError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn handler_panic_becomes_internal_error() {
        let dispatcher = dispatcher_with(Arc::new(AtomicUsize::new(0)));
        let frame = dispatcher
            .dispatch(SessionId::new(), "9", "DataTransfer", json!({"vendorId": "acme"}))
            .await;
        assert_eq!(error_code_of(&frame), "InternalError");
    }

    #[tokio::test]
    async fn handler_can_decline_with_not_supported() {
        let dispatcher = dispatcher_with(Arc::new(AtomicUsize::new(0)));
        let frame = dispatcher
            .dispatch(
                SessionId::new(),
                "10",
                "StatusNotification",
                json!({"connectorId": 1, "errorCode": "NoError", "status": "Available"}),
            )
            .await;
        assert_eq!(error_code_of(&frame), "NotSupported");
    }

    #[tokio::test]
    async fn invalid_confirmation_is_internal_error() {
        let dispatcher = dispatcher_with(Arc::new(AtomicUsize::new(0)));
        let frame = dispatcher
            .dispatch(
                SessionId::new(),
                "11",
                "BootNotification",
                json!({"chargePointVendor": "Acme", "chargePointModel": "X1"}),
            )
            .await;
        assert_eq!(error_code_of(&frame), "InternalError");
    }
}
