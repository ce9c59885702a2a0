//! OCPP-J WebSocket server (central system role)
//!
//! Accepts charge-point connections at `ws://<host>:<port>/ocpp/{charge_point_id}`,
//! negotiates the protocol version from `Sec-WebSocket-Protocol` and opens
//! one [`Session`] per connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tracing::{error, info, warn};

use super::connection::pump;
use super::negotiator::{ProtocolNegotiator, VersionDispatchers};
use crate::application::events::SharedEventBus;
use crate::application::session::{
    Session, SessionConfig, SessionRegistry, SharedSessionRegistry, TimeoutSupervisor,
};
use crate::domain::OcppVersion;
use crate::support::errors::TransportError;
use crate::support::shutdown::ShutdownSignal;

const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// Everything a connection task needs, shared by all of them.
#[derive(Clone)]
struct ServerContext {
    dispatchers: VersionDispatchers,
    negotiator: ProtocolNegotiator,
    session_config: SessionConfig,
    sessions: SharedSessionRegistry,
    supervisor: TimeoutSupervisor,
    events: Option<SharedEventBus>,
    shutdown: Option<ShutdownSignal>,
}

pub struct OcppServer {
    address: String,
    context: ServerContext,
}

impl OcppServer {
    pub fn new(
        address: impl Into<String>,
        dispatchers: VersionDispatchers,
        session_config: SessionConfig,
    ) -> Self {
        let negotiator = dispatchers.build_negotiator();
        Self {
            address: address.into(),
            context: ServerContext {
                dispatchers,
                negotiator,
                session_config,
                sessions: SessionRegistry::shared(),
                supervisor: TimeoutSupervisor::new(),
                events: None,
                shutdown: None,
            },
        }
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.context.events = Some(events);
        self
    }

    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.context.shutdown = Some(signal);
        self
    }

    /// Live sessions, for issuing calls to connected charge points.
    pub fn sessions(&self) -> SharedSessionRegistry {
        self.context.sessions.clone()
    }

    pub async fn bind(&self) -> Result<TcpListener, TransportError> {
        let listener = TcpListener::bind(&self.address).await?;
        info!(
            address = %listener.local_addr()?,
            subprotocols = ?self.context.negotiator.supported_subprotocols(),
            "OCPP server listening on ws://{}/ocpp/{{charge_point_id}}",
            self.address
        );
        Ok(listener)
    }

    pub async fn run(&self) -> Result<(), TransportError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), TransportError> {
        let context = Arc::new(self.context.clone());
        match context.shutdown.clone() {
            Some(shutdown) => loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, addr)) => spawn_connection(&context, stream, addr),
                        Err(e) => error!(error = %e, "Failed to accept connection"),
                    },
                    _ = shutdown.wait() => {
                        info!("OCPP server received shutdown signal");
                        self.graceful_shutdown();
                        return Ok(());
                    }
                }
            },
            None => loop {
                match listener.accept().await {
                    Ok((stream, addr)) => spawn_connection(&context, stream, addr),
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                }
            },
        }
    }

    fn graceful_shutdown(&self) {
        let connected = self.context.sessions.count();
        let abandoned = self.context.sessions.close_all();
        info!(connected, abandoned, "OCPP server shutdown complete");
    }
}

fn spawn_connection(context: &Arc<ServerContext>, stream: TcpStream, addr: SocketAddr) {
    let context = context.clone();
    tokio::spawn(async move {
        if let Err(e) = handle_connection(stream, addr, context).await {
            warn!(%addr, error = %e, "Connection failed");
        }
    });
}

/// Charge point id from `/ocpp/{id}` or `/{id}`.
fn extract_charge_point_id(path: &str) -> Option<String> {
    let path = path.trim_start_matches('/');

    if let Some(id) = path.strip_prefix("ocpp/") {
        let id = id.trim_matches('/');
        if !id.is_empty() && !id.contains('/') {
            return Some(id.to_string());
        }
        return None;
    }

    if !path.is_empty() && !path.contains('/') {
        return Some(path.to_string());
    }

    None
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    context: Arc<ServerContext>,
) -> Result<(), TransportError> {
    let mut accepted: Option<(String, OcppVersion)> = None;

    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, mut response: Response| {
            let path = req.uri().path();
            let Some(charge_point_id) = extract_charge_point_id(path) else {
                warn!(%addr, path, "Rejecting connection without charge point id");
                return Err(reject(StatusCode::NOT_FOUND, "expected /ocpp/{chargePointId}"));
            };

            let requested = req
                .headers()
                .get(SUBPROTOCOL_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");

            let version = if requested.trim().is_empty() {
                context.negotiator.fallback()
            } else {
                context.negotiator.negotiate(requested)
            };
            let Some(version) = version else {
                warn!(
                    charge_point_id = charge_point_id.as_str(),
                    requested,
                    "No mutually supported OCPP version"
                );
                return Err(reject(StatusCode::BAD_REQUEST, "unsupported subprotocol"));
            };

            if !requested.trim().is_empty() {
                response.headers_mut().insert(
                    SUBPROTOCOL_HEADER,
                    HeaderValue::from_static(version.subprotocol()),
                );
            }
            accepted = Some((charge_point_id, version));
            Ok(response)
        },
    )
    .await?;

    let Some((charge_point_id, version)) = accepted else {
        return Ok(());
    };
    let Some(dispatcher) = context.dispatchers.get(version).cloned() else {
        return Err(TransportError::UnsupportedVersion(version));
    };

    info!(
        charge_point_id = charge_point_id.as_str(),
        %addr,
        %version,
        "Charge point connected"
    );

    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let mut builder = Session::builder(charge_point_id.as_str(), dispatcher)
        .config(context.session_config.clone())
        .supervisor(context.supervisor.clone());
    if let Some(events) = &context.events {
        builder = builder.events(events.clone());
    }
    let session = builder.open(tx);
    let session_id = session.id();

    context.sessions.register(session.clone());
    pump(ws_stream, session, rx, context.shutdown.clone()).await;
    context.sessions.unregister(&charge_point_id, session_id);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_point_id_from_path() {
        assert_eq!(extract_charge_point_id("/ocpp/CP001"), Some("CP001".into()));
        assert_eq!(extract_charge_point_id("/ocpp/CP001/"), Some("CP001".into()));
        assert_eq!(extract_charge_point_id("/CP002"), Some("CP002".into()));
        assert_eq!(extract_charge_point_id("/ocpp/"), None);
        assert_eq!(extract_charge_point_id("/ocpp/a/b"), None);
        assert_eq!(extract_charge_point_id("/"), None);
    }

    #[test]
    fn rejection_carries_status() {
        let response = reject(StatusCode::BAD_REQUEST, "unsupported subprotocol");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.body().as_deref(), Some("unsupported subprotocol"));
    }
}
