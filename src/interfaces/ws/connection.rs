//! WebSocket connection pump shared by the server and the client
//!
//! Writer: drains the session's outbound channel into the socket.
//! Reader: feeds text frames to the session in arrival order. Replies are
//! settled on the spot; calls are queued for the session's call worker.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, trace, warn};

use crate::application::session::Session;
use crate::support::shutdown::ShutdownSignal;

const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a connection pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// Peer sent a close frame or the stream ended.
    PeerClosed,
    /// Socket read or write failed.
    TransportError,
    /// The session was closed locally.
    SessionClosed,
    Shutdown,
}

/// Drive `ws` for `session` until either side goes away, then close the
/// session. `outbound` is the receiving half of the channel the session
/// was opened with.
pub async fn pump<S>(
    ws: WebSocketStream<S>,
    session: Session,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shutdown: Option<ShutdownSignal>,
) -> Disconnect
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_sender, mut ws_receiver) = ws.split();
    let charge_point_id = session.charge_point_id().to_string();

    let cp_id = charge_point_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            trace!(charge_point_id = cp_id.as_str(), "-> {}", text);
            if let Err(e) = ws_sender.send(Message::Text(text)).await {
                error!(charge_point_id = cp_id.as_str(), error = %e, "Send error");
                return Disconnect::TransportError;
            }
        }
        // Session dropped its sender.
        let _ = ws_sender.send(Message::Close(None)).await;
        Disconnect::SessionClosed
    });

    let reader = session.clone();
    let cp_id = charge_point_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    trace!(charge_point_id = cp_id.as_str(), "<- {}", text);
                    reader.handle_text(&text).await;
                }
                Ok(Message::Close(frame)) => {
                    debug!(charge_point_id = cp_id.as_str(), ?frame, "Close frame received");
                    return Disconnect::PeerClosed;
                }
                Ok(Message::Binary(data)) => {
                    warn!(
                        charge_point_id = cp_id.as_str(),
                        bytes = data.len(),
                        "Binary message ignored"
                    );
                }
                // Pings are answered by tungstenite itself.
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(e) => {
                    warn!(charge_point_id = cp_id.as_str(), error = %e, "WebSocket error");
                    return Disconnect::TransportError;
                }
            }
        }
        Disconnect::PeerClosed
    });

    let (reason, writer_done) = match shutdown {
        Some(shutdown) => tokio::select! {
            r = &mut send_task => (r.unwrap_or(Disconnect::TransportError), true),
            r = &mut recv_task => (r.unwrap_or(Disconnect::TransportError), false),
            _ = shutdown.wait() => (Disconnect::Shutdown, false),
        },
        None => tokio::select! {
            r = &mut send_task => (r.unwrap_or(Disconnect::TransportError), true),
            r = &mut recv_task => (r.unwrap_or(Disconnect::TransportError), false),
        },
    };

    recv_task.abort();
    session.close();
    // Closing the session dropped its sender; give the writer a moment to
    // flush the close frame unless the socket is already broken.
    if !writer_done {
        if reason == Disconnect::TransportError {
            send_task.abort();
        } else if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut send_task)
            .await
            .is_err()
        {
            send_task.abort();
        }
    }

    info!(
        charge_point_id = charge_point_id.as_str(),
        session_id = %session.id(),
        ?reason,
        "Connection finished"
    );
    reason
}
