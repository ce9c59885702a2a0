//! Subprotocol selection
//!
//! A connecting charge point lists the OCPP versions it speaks in
//! `Sec-WebSocket-Protocol`; the server answers with exactly one of them,
//! and that version fixes the dispatcher and error-code spelling for the
//! whole session.

use std::collections::HashMap;

use tracing::info;

use crate::application::dispatcher::Dispatcher;
use crate::domain::OcppVersion;

/// Picks the highest version both ends support.
#[derive(Debug, Clone)]
pub struct ProtocolNegotiator {
    /// Highest first.
    supported_versions: Vec<OcppVersion>,
}

impl ProtocolNegotiator {
    pub fn new(mut supported_versions: Vec<OcppVersion>) -> Self {
        supported_versions.sort_by_key(|v| std::cmp::Reverse(v.rank()));
        supported_versions.dedup();
        Self { supported_versions }
    }

    /// Negotiate from a `Sec-WebSocket-Protocol` header value.
    pub fn negotiate(&self, requested_protocols: &str) -> Option<OcppVersion> {
        let requested: Vec<OcppVersion> = requested_protocols
            .split(',')
            .filter_map(|p| OcppVersion::from_subprotocol(p.trim()))
            .collect();

        self.supported_versions
            .iter()
            .copied()
            .find(|version| requested.contains(version))
    }

    /// Version assumed when the client sends no subprotocol at all.
    pub fn fallback(&self) -> Option<OcppVersion> {
        self.supported_versions.last().copied()
    }

    pub fn supported_versions(&self) -> &[OcppVersion] {
        &self.supported_versions
    }

    pub fn supported_subprotocols(&self) -> Vec<&'static str> {
        self.supported_versions
            .iter()
            .map(|v| v.subprotocol())
            .collect()
    }
}

// ── VersionDispatchers ─────────────────────────────────────────

/// One dispatcher per protocol version served.
///
/// The server negotiates a version during the handshake and opens the
/// session with the matching dispatcher.
#[derive(Clone, Default)]
pub struct VersionDispatchers {
    dispatchers: HashMap<OcppVersion, Dispatcher>,
}

impl VersionDispatchers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `dispatcher`'s registry version. Replaces any earlier one.
    pub fn insert(&mut self, dispatcher: Dispatcher) -> &mut Self {
        let version = dispatcher.registry().version();
        info!(
            %version,
            actions = dispatcher.registry().len(),
            "Registered protocol dispatcher"
        );
        self.dispatchers.insert(version, dispatcher);
        self
    }

    pub fn get(&self, version: OcppVersion) -> Option<&Dispatcher> {
        self.dispatchers.get(&version)
    }

    pub fn supported_versions(&self) -> Vec<OcppVersion> {
        self.dispatchers.keys().copied().collect()
    }

    pub fn build_negotiator(&self) -> ProtocolNegotiator {
        ProtocolNegotiator::new(self.supported_versions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::ActionRegistry;
    use crate::domain::Role;

    #[test]
    fn negotiate_single_match() {
        let negotiator = ProtocolNegotiator::new(vec![OcppVersion::V16]);
        assert_eq!(negotiator.negotiate("ocpp1.6"), Some(OcppVersion::V16));
    }

    #[test]
    fn negotiate_multiple_prefers_highest() {
        let negotiator = ProtocolNegotiator::new(vec![OcppVersion::V16, OcppVersion::V201]);
        assert_eq!(
            negotiator.negotiate("ocpp1.6, ocpp2.0.1"),
            Some(OcppVersion::V201)
        );
    }

    #[test]
    fn negotiate_accepts_short_201_name() {
        let negotiator = ProtocolNegotiator::new(vec![OcppVersion::V201]);
        assert_eq!(negotiator.negotiate("ocpp2.0"), Some(OcppVersion::V201));
    }

    #[test]
    fn negotiate_no_match() {
        let negotiator = ProtocolNegotiator::new(vec![OcppVersion::V16]);
        assert_eq!(negotiator.negotiate("ocpp2.0.1"), None);
        assert_eq!(negotiator.negotiate(""), None);
    }

    #[test]
    fn fallback_is_lowest_version() {
        let negotiator = ProtocolNegotiator::new(vec![OcppVersion::V201, OcppVersion::V16]);
        assert_eq!(negotiator.fallback(), Some(OcppVersion::V16));
        assert_eq!(
            negotiator.supported_subprotocols(),
            vec!["ocpp2.0.1", "ocpp1.6"]
        );
    }

    #[test]
    fn dispatchers_build_negotiator() {
        let mut dispatchers = VersionDispatchers::new();
        dispatchers.insert(Dispatcher::new(
            ActionRegistry::builder(OcppVersion::V16, Role::CentralSystem).build(),
        ));
        let negotiator = dispatchers.build_negotiator();
        assert_eq!(negotiator.supported_versions(), &[OcppVersion::V16]);
        assert!(dispatchers.get(OcppVersion::V201).is_none());
    }
}
