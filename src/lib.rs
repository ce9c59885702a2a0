//! # OCPP message exchange
//!
//! Bidirectional request/response engine for OCPP 1.6 and 2.0.1 over
//! OCPP-J (JSON over WebSocket). Either end of a session can act as charge
//! point or central system.
//!
//! ## Architecture
//!
//! - **domain**: protocol vocabulary (versions, error codes, payload contracts)
//! - **messages**: typed request / confirmation catalogs per version
//! - **application**: action registry, dispatcher, sessions and events
//! - **interfaces**: WebSocket server and client
//! - **support**: frame codec, payload checks, retry and shutdown helpers
//!
//! A session allows at most one outstanding outgoing call. Every call ends
//! exactly once: confirmation, error, timeout or connection close.

pub mod application;
pub mod config;
pub mod domain;
pub mod interfaces;
pub mod messages;
pub mod server;
pub mod support;

pub use application::{
    create_event_bus, handler_fn, ActionRegistry, BusyPolicy, CallFuture, Dispatcher,
    RequestHandler, Session, SessionConfig, SessionEvent, SessionRegistry, SharedEventBus,
};
pub use config::{default_config_path, AppConfig};
pub use domain::{ErrorCode, OcppConfirmation, OcppRequest, OcppVersion, Role, SessionId};
pub use interfaces::ws::{OcppClient, OcppClientOptions, OcppServer, VersionDispatchers};
pub use support::errors::{CallFailure, HandlerError, TransportError};
