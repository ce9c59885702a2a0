//! Server runtime for the central system role
//!
//! [`ServerHandle`] owns the lifecycle of the OCPP-J listener: bind,
//! accept until shutdown, then close every session so no pending call is
//! left unresolved. The binary and the integration tests both start the
//! server through it.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::events::{create_event_bus, SharedEventBus};
use crate::application::session::{SessionConfig, SharedSessionRegistry};
use crate::config::{AppConfig, LoggingConfig, MetricsConfig};
use crate::interfaces::ws::{OcppServer, VersionDispatchers};
use crate::support::errors::TransportError;
use crate::support::shutdown::{ShutdownCoordinator, ShutdownSignal};

// ── Options ────────────────────────────────────────────────────────

pub struct ServerOptions {
    pub config: AppConfig,
    /// Protocol versions served and their handlers.
    pub dispatchers: VersionDispatchers,
}

// ── ServerHandle ───────────────────────────────────────────────────

/// Handle to a running OCPP-J server.
///
/// ```rust,no_run
/// use ocpp_exchange::server::{ServerHandle, ServerOptions};
/// # async fn run(options: ServerOptions) -> Result<(), Box<dyn std::error::Error>> {
/// let handle = ServerHandle::start(options).await?;
/// handle.install_signal_handler();
/// handle.shutdown_signal().wait().await;
/// handle.wait().await;
/// # Ok(())
/// # }
/// ```
pub struct ServerHandle {
    /// Live sessions by charge point id.
    pub sessions: SharedSessionRegistry,
    /// Session lifecycle events.
    pub events: SharedEventBus,
    /// Address actually bound (useful with port 0).
    pub local_addr: SocketAddr,

    shutdown: ShutdownCoordinator,
    ws_task: JoinHandle<Result<(), TransportError>>,
}

impl ServerHandle {
    pub async fn start(options: ServerOptions) -> Result<Self, TransportError> {
        let config = options.config;
        let shutdown = ShutdownCoordinator::new(Duration::from_secs(config.server.shutdown_timeout));
        let events = create_event_bus();

        let server = OcppServer::new(
            config.server.address(),
            options.dispatchers,
            SessionConfig::from(&config.session),
        )
        .with_events(events.clone())
        .with_shutdown(shutdown.signal());

        let listener = server.bind().await?;
        let local_addr = listener.local_addr()?;
        let sessions = server.sessions();

        let ws_task = tokio::spawn(async move { server.serve(listener).await });

        Ok(Self {
            sessions,
            events,
            local_addr,
            shutdown,
            ws_task,
        })
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.signal()
    }

    /// Trigger shutdown on SIGTERM / SIGINT.
    pub fn install_signal_handler(&self) {
        self.shutdown.start_signal_listener();
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.signal().trigger();
    }

    /// Wait for the listener to stop after shutdown was triggered, bounded
    /// by `server.shutdown_timeout`.
    pub async fn wait(self) {
        let ws_task = self.ws_task;
        let finished = self
            .shutdown
            .shutdown_with_cleanup(|| async move {
                match ws_task.await {
                    Ok(Ok(())) => info!("OCPP server stopped"),
                    Ok(Err(e)) => error!(error = %e, "OCPP server failed"),
                    Err(e) => error!(error = %e, "OCPP server task panicked"),
                }
            })
            .await;
        if !finished {
            // Listener is stuck; make sure no session outlives the process.
            self.sessions.close_all();
        }
    }

    pub async fn shutdown(self) {
        self.trigger_shutdown();
        self.wait().await;
    }

    pub fn is_running(&self) -> bool {
        !self.ws_task.is_finished()
    }
}

// ── Ambient setup ──────────────────────────────────────────────────

/// Initialise tracing. `RUST_LOG` overrides `config.level`.
///
/// Call once at startup; later calls are ignored.
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let result = match config.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Install the Prometheus recorder with its scrape listener, if enabled.
pub fn install_metrics(config: &MetricsConfig) -> Result<bool, Box<dyn std::error::Error>> {
    if !config.enabled {
        return Ok(false);
    }
    let listen = config.listen_addr()?;
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()?;
    info!(%listen, "Prometheus metrics exporter listening");
    Ok(true)
}
