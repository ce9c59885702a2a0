//! Session registry: live sessions indexed by charge point id

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{OcppVersion, SessionId};

use super::connection::Session;

/// Thread-safe index of open sessions.
///
/// A charge point that reconnects replaces its previous session; the old
/// one is closed so its pending call is not left dangling.
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
}

/// Shared, reference-counted session registry
pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn shared() -> SharedSessionRegistry {
        Arc::new(Self::new())
    }

    /// Index `session` under its charge point id, closing any session it
    /// replaces.
    pub fn register(&self, session: Session) -> Option<Session> {
        let charge_point_id = session.charge_point_id().to_string();
        info!(
            charge_point_id = charge_point_id.as_str(),
            session_id = %session.id(),
            version = %session.version(),
            "Registering session"
        );

        let evicted = self.sessions.insert(charge_point_id.clone(), session);
        if let Some(old) = &evicted {
            warn!(
                charge_point_id = charge_point_id.as_str(),
                session_id = %old.id(),
                "Evicting previous session"
            );
            old.close();
        }
        evicted
    }

    /// Remove the entry for `charge_point_id` if it still belongs to
    /// `session_id`; a newer session for the same charge point is kept.
    pub fn unregister(&self, charge_point_id: &str, session_id: SessionId) -> bool {
        let removed = self
            .sessions
            .remove_if(charge_point_id, |_, session| session.id() == session_id)
            .is_some();
        if removed {
            info!(charge_point_id, %session_id, "Unregistered session");
        }
        removed
    }

    pub fn get(&self, charge_point_id: &str) -> Option<Session> {
        self.sessions.get(charge_point_id).map(|s| s.value().clone())
    }

    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.sessions.contains_key(charge_point_id)
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn get_version(&self, charge_point_id: &str) -> Option<OcppVersion> {
        self.sessions.get(charge_point_id).map(|s| s.version())
    }

    /// Close and drop every session. Returns the number of calls abandoned.
    pub fn close_all(&self) -> usize {
        let sessions: Vec<Session> = self.sessions.iter().map(|r| r.value().clone()).collect();
        self.sessions.clear();
        sessions.iter().map(Session::close).sum()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
