//! Action registry
//!
//! Maps a wire action name to its feature: request type, confirmation type
//! and handler. A registry is scoped to one protocol version and one role,
//! built once at startup and frozen behind an `Arc`; lookups afterwards are
//! plain reads shared by every session.
//!
//! ```ignore
//! let mut builder = ActionRegistry::builder(OcppVersion::V16, Role::CentralSystem);
//! builder
//!     .register(handler_fn(|_session, _req: v16::HeartbeatRequest| async move {
//!         Ok::<_, HandlerError>(v16::HeartbeatResponse { current_time: Utc::now() })
//!     }))?
//!     .register(AuthorizeHandler::new(store))?;
//! let registry = builder.build();
//! ```

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tracing::debug;

use crate::domain::{ErrorCode, OcppConfirmation, OcppRequest, OcppVersion, Role, SessionId};
use crate::messages::known_actions;
use crate::support::errors::{HandlerError, RegistryError};
use crate::support::payload::{decode_payload, encode_payload, validate_payload, PayloadError};

// ── Handler contract ───────────────────────────────────────────

/// Business logic answering one request type.
///
/// Domain refusals are expressed in the confirmation (e.g. `status:
/// Rejected`); an `Err` means the handler could not do its job at all.
#[async_trait]
pub trait RequestHandler<R: OcppRequest>: Send + Sync + 'static {
    async fn handle(
        &self,
        session: SessionId,
        request: R,
    ) -> Result<R::Confirmation, HandlerError>;
}

/// Adapter turning an async closure into a [`RequestHandler`].
pub struct FnHandler<F, R> {
    f: F,
    _request: PhantomData<fn(R)>,
}

/// Wrap `f` so it can be registered as a handler.
pub fn handler_fn<R, F, Fut>(f: F) -> FnHandler<F, R>
where
    R: OcppRequest,
    F: Fn(SessionId, R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Confirmation, HandlerError>> + Send + 'static,
{
    FnHandler {
        f,
        _request: PhantomData,
    }
}

#[async_trait]
impl<R, F, Fut> RequestHandler<R> for FnHandler<F, R>
where
    R: OcppRequest,
    F: Fn(SessionId, R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Confirmation, HandlerError>> + Send + 'static,
{
    async fn handle(
        &self,
        session: SessionId,
        request: R,
    ) -> Result<R::Confirmation, HandlerError> {
        (self.f)(session, request).await
    }
}

// ── Type-erased payloads ───────────────────────────────────────

/// A decoded request whose concrete type is only known to its feature.
pub trait AnyRequest: Send {
    fn check_payload(&self) -> Result<(), PayloadError>;
    fn transactional(&self) -> bool;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<R: OcppRequest> AnyRequest for R {
    fn check_payload(&self) -> Result<(), PayloadError> {
        validate_payload(self)
    }

    fn transactional(&self) -> bool {
        OcppRequest::is_transaction_related(self)
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// A confirmation produced by a handler, ready to be checked and encoded.
pub trait AnyConfirmation: Send {
    fn check_payload(&self) -> Result<(), PayloadError>;
    fn to_payload(&self) -> Result<Value, PayloadError>;
}

impl<C: OcppConfirmation> AnyConfirmation for C {
    fn check_payload(&self) -> Result<(), PayloadError> {
        validate_payload(self)
    }

    fn to_payload(&self) -> Result<Value, PayloadError> {
        encode_payload(self)
    }
}

pub type ConfirmationFuture = BoxFuture<'static, Result<Box<dyn AnyConfirmation>, HandlerError>>;

/// Decode and invoke operations of one registered action.
pub trait Feature: Send + Sync {
    fn decode_request(&self, payload: Value) -> Result<Box<dyn AnyRequest>, PayloadError>;
    fn invoke(&self, session: SessionId, request: Box<dyn AnyRequest>) -> ConfirmationFuture;
}

struct TypedFeature<R: OcppRequest> {
    handler: Arc<dyn RequestHandler<R>>,
}

impl<R: OcppRequest> Feature for TypedFeature<R> {
    fn decode_request(&self, payload: Value) -> Result<Box<dyn AnyRequest>, PayloadError> {
        let request: R = decode_payload(payload)?;
        Ok(Box::new(request))
    }

    fn invoke(&self, session: SessionId, request: Box<dyn AnyRequest>) -> ConfirmationFuture {
        let handler = self.handler.clone();
        async move {
            let request = request.into_any().downcast::<R>().map_err(|_| {
                HandlerError::Internal(format!("request is not a {}", type_name::<R>()))
            })?;
            let confirmation = handler.handle(session, *request).await?;
            Ok(Box::new(confirmation) as Box<dyn AnyConfirmation>)
        }
        .boxed()
    }
}

// ── Registry ───────────────────────────────────────────────────

/// One registered action.
pub struct FeatureEntry {
    pub action: &'static str,
    pub request_type: &'static str,
    pub confirmation_type: &'static str,
    feature: Box<dyn Feature>,
}

impl FeatureEntry {
    pub fn feature(&self) -> &dyn Feature {
        self.feature.as_ref()
    }
}

impl std::fmt::Debug for FeatureEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureEntry")
            .field("action", &self.action)
            .field("request_type", &self.request_type)
            .field("confirmation_type", &self.confirmation_type)
            .finish()
    }
}

/// Frozen action table for one protocol version and role.
#[derive(Debug)]
pub struct ActionRegistry {
    version: OcppVersion,
    role: Role,
    entries: HashMap<&'static str, FeatureEntry>,
}

/// Shared, reference-counted action registry
pub type SharedActionRegistry = Arc<ActionRegistry>;

impl ActionRegistry {
    pub fn builder(version: OcppVersion, role: Role) -> ActionRegistryBuilder {
        ActionRegistryBuilder {
            registry: ActionRegistry {
                version,
                role,
                entries: HashMap::new(),
            },
        }
    }

    /// Find the feature for `action`.
    ///
    /// Errors with `NotSupported` when the protocol defines the action but
    /// nothing is registered for it, `NotImplemented` otherwise.
    pub fn lookup(&self, action: &str) -> Result<&FeatureEntry, ErrorCode> {
        if let Some(entry) = self.entries.get(action) {
            return Ok(entry);
        }
        if known_actions(self.version).iter().any(|known| *known == action) {
            Err(ErrorCode::NotSupported)
        } else {
            Err(ErrorCode::NotImplemented)
        }
    }

    pub fn contains(&self, action: &str) -> bool {
        self.entries.contains_key(action)
    }

    pub fn version(&self) -> OcppVersion {
        self.version
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<&'static str> {
        let mut actions: Vec<_> = self.entries.keys().copied().collect();
        actions.sort_unstable();
        actions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Mutable phase of an [`ActionRegistry`]; consumed by [`build`](Self::build).
#[derive(Debug)]
pub struct ActionRegistryBuilder {
    registry: ActionRegistry,
}

impl ActionRegistryBuilder {
    /// Register the handler for `R::ACTION`. Registering an action twice fails.
    pub fn register<R, H>(&mut self, handler: H) -> Result<&mut Self, RegistryError>
    where
        R: OcppRequest,
        H: RequestHandler<R>,
    {
        if self.registry.entries.contains_key(R::ACTION) {
            return Err(RegistryError::DuplicateAction(R::ACTION));
        }

        debug!(
            action = R::ACTION,
            version = %self.registry.version,
            role = %self.registry.role,
            "Registered feature"
        );

        self.registry.entries.insert(
            R::ACTION,
            FeatureEntry {
                action: R::ACTION,
                request_type: type_name::<R>(),
                confirmation_type: type_name::<R::Confirmation>(),
                feature: Box::new(TypedFeature::<R> {
                    handler: Arc::new(handler),
                }),
            },
        );
        Ok(self)
    }

    pub fn build(self) -> SharedActionRegistry {
        Arc::new(self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::v16;
    use chrono::Utc;
    use serde_json::json;

    fn heartbeat() -> impl RequestHandler<v16::HeartbeatRequest> {
        handler_fn(|_session, _req: v16::HeartbeatRequest| async move {
            Ok::<_, HandlerError>(v16::HeartbeatResponse {
                current_time: Utc::now(),
            })
        })
    }

    #[test]
    fn lookup_registered_action() {
        let mut builder = ActionRegistry::builder(OcppVersion::V16, Role::CentralSystem);
        builder.register(heartbeat()).unwrap();
        let registry = builder.build();

        let entry = registry.lookup("Heartbeat").unwrap();
        assert_eq!(entry.action, "Heartbeat");
        assert!(entry.request_type.ends_with("HeartbeatRequest"));
        assert!(entry.confirmation_type.ends_with("HeartbeatResponse"));
        assert_eq!(registry.actions(), vec!["Heartbeat"]);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut builder = ActionRegistry::builder(OcppVersion::V16, Role::CentralSystem);
        builder.register(heartbeat()).unwrap();
        let err = builder.register(heartbeat()).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateAction("Heartbeat"));
    }

    #[test]
    fn unknown_and_unsupported_are_distinguished() {
        let registry = ActionRegistry::builder(OcppVersion::V16, Role::CentralSystem).build();
        assert_eq!(registry.lookup("Authorize").unwrap_err(), ErrorCode::NotSupported);
        assert_eq!(registry.lookup("Frobnicate").unwrap_err(), ErrorCode::NotImplemented);
        assert!(registry.is_empty());
    }

    #[test]
    fn known_actions_follow_registry_version() {
        let registry = ActionRegistry::builder(OcppVersion::V201, Role::CentralSystem).build();
        assert_eq!(
            registry.lookup("TransactionEvent").unwrap_err(),
            ErrorCode::NotSupported
        );
        assert_eq!(
            registry.lookup("StartTransaction").unwrap_err(),
            ErrorCode::NotImplemented
        );
    }

    #[tokio::test]
    async fn feature_decodes_and_invokes() {
        let mut builder = ActionRegistry::builder(OcppVersion::V16, Role::CentralSystem);
        builder
            .register(handler_fn(|_s, req: v16::AuthorizeRequest| async move {
                let status = if req.id_tag == "ABC123" {
                    v16::AuthorizationStatus::Accepted
                } else {
                    v16::AuthorizationStatus::Invalid
                };
                Ok::<_, HandlerError>(v16::AuthorizeResponse {
                    id_tag_info: v16::IdTagInfo::with_status(status),
                })
            }))
            .unwrap();
        let registry = builder.build();

        let feature = registry.lookup("Authorize").unwrap().feature();
        let request = feature.decode_request(json!({"idTag": "ABC123"})).unwrap();
        assert!(request.check_payload().is_ok());
        assert!(!request.transactional());

        let confirmation = feature.invoke(SessionId::new(), request).await.unwrap();
        assert_eq!(
            confirmation.to_payload().unwrap(),
            json!({"idTagInfo": {"status": "Accepted"}})
        );
    }
}
