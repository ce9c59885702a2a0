//! WebSocket interfaces
//!
//! - `ocpp_server`: OCPP-J server, central system role (multi-version)
//! - `ocpp_client`: OCPP-J client, charge point role
//! - `connection`: socket pump shared by both
//! - `negotiator`: protocol version negotiation

pub mod connection;
pub mod negotiator;
pub mod ocpp_client;
pub mod ocpp_server;

pub use connection::Disconnect;
pub use negotiator::{ProtocolNegotiator, VersionDispatchers};
pub use ocpp_client::{OcppClient, OcppClientOptions};
pub use ocpp_server::OcppServer;
