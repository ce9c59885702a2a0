//! OCPP-J WebSocket client (charge point role)
//!
//! Connects to `<central system url>/<charge_point_id>` offering exactly
//! the dispatcher's protocol version, then drives the session with the
//! same pump the server uses.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::info;

use super::connection::{pump, Disconnect};
use crate::application::dispatcher::Dispatcher;
use crate::application::events::SharedEventBus;
use crate::application::session::{Session, SessionConfig};
use crate::support::errors::TransportError;
use crate::support::shutdown::ShutdownSignal;

const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// A connected client session and the task pumping its socket.
pub struct OcppClient {
    pub session: Session,
    pub connection: JoinHandle<Disconnect>,
}

#[derive(Default)]
pub struct OcppClientOptions {
    pub session_config: SessionConfig,
    pub events: Option<SharedEventBus>,
    pub shutdown: Option<ShutdownSignal>,
}

impl OcppClient {
    /// Connect to `base_url` (e.g. `ws://csms:9000/ocpp`) as `charge_point_id`.
    pub async fn connect(
        base_url: &str,
        charge_point_id: &str,
        dispatcher: Dispatcher,
        options: OcppClientOptions,
    ) -> Result<Self, TransportError> {
        let version = dispatcher.registry().version();
        let url = format!("{}/{}", base_url.trim_end_matches('/'), charge_point_id);

        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().insert(
            SUBPROTOCOL_HEADER,
            HeaderValue::from_static(version.subprotocol()),
        );

        let (ws_stream, response) = tokio_tungstenite::connect_async(request).await?;

        let agreed = response
            .headers()
            .get(SUBPROTOCOL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim);
        if agreed != Some(version.subprotocol()) {
            return Err(TransportError::SubprotocolRejected {
                requested: version.subprotocol(),
            });
        }

        info!(charge_point_id, url = url.as_str(), %version, "Connected to central system");

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let mut builder = Session::builder(charge_point_id, dispatcher).config(options.session_config);
        if let Some(events) = options.events {
            builder = builder.events(events);
        }
        let session = builder.open(tx);

        let connection = tokio::spawn(pump(ws_stream, session.clone(), rx, options.shutdown));
        Ok(Self {
            session,
            connection,
        })
    }

    /// Close the session and wait for the socket to wind down.
    pub async fn disconnect(self) -> Disconnect {
        self.session.close();
        self.connection
            .await
            .unwrap_or(Disconnect::TransportError)
    }
}
