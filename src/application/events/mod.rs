//! Session lifecycle events (pub/sub)
//!
//! Sessions publish here; anything interested in who is connected or in
//! protocol anomalies subscribes without the session knowing about it.

pub mod event_bus;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{OcppVersion, Role, SessionId};

pub use event_bus::{create_event_bus, EventBus, EventSubscriber, SharedEventBus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Opened {
        session_id: SessionId,
        charge_point_id: String,
        version: OcppVersion,
        role: Role,
    },
    Closed {
        session_id: SessionId,
        charge_point_id: String,
        /// Calls rejected with `ConnectionClosing` (pending + queued).
        abandoned_calls: usize,
    },
    /// A `CallResult` / `CallError` whose id matched no pending call.
    UnmatchedResponse {
        session_id: SessionId,
        charge_point_id: String,
        unique_id: String,
    },
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Opened { .. } => "session_opened",
            Self::Closed { .. } => "session_closed",
            Self::UnmatchedResponse { .. } => "unmatched_response",
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            Self::Opened { session_id, .. }
            | Self::Closed { session_id, .. }
            | Self::UnmatchedResponse { session_id, .. } => *session_id,
        }
    }

    pub fn charge_point_id(&self) -> &str {
        match self {
            Self::Opened {
                charge_point_id, ..
            }
            | Self::Closed {
                charge_point_id, ..
            }
            | Self::UnmatchedResponse {
                charge_point_id, ..
            } => charge_point_id,
        }
    }
}

/// Event envelope stamped at publish time.
#[derive(Debug, Clone, Serialize)]
pub struct EventMessage {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SessionEvent,
}

impl EventMessage {
    pub fn new(event: SessionEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
