//! OCPP exchange: demo central system
//!
//! Serves OCPP 1.6 and 2.0.1 charge points over OCPP-J with a minimal set
//! of handlers (boot, heartbeat, authorize, status, transactions).
//!
//! ```sh
//! # Run with default config (~/.config/ocpp-exchange/config.toml)
//! ocpp-exchange
//!
//! # Custom config path and port
//! ocpp-exchange --config /etc/ocpp-exchange/config.toml --port 9000
//!
//! # Validate config without starting
//! ocpp-exchange --check
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tracing::{debug, error, info};

use ocpp_exchange::application::events::SharedEventBus;
use ocpp_exchange::config::AppConfig;
use ocpp_exchange::messages::{v16, v201};
use ocpp_exchange::server::{init_tracing, install_metrics, ServerHandle, ServerOptions};
use ocpp_exchange::support::errors::RegistryError;
use ocpp_exchange::{
    default_config_path, handler_fn, ActionRegistry, Dispatcher, HandlerError, OcppVersion, Role,
    VersionDispatchers,
};

/// Heartbeat interval handed out in BootNotification confirmations.
const HEARTBEAT_INTERVAL_SECS: i32 = 300;

#[derive(Parser, Debug)]
#[command(
    name = "ocpp-exchange",
    version,
    about = "OCPP 1.6 / 2.0.1 central system over OCPP-J"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "OCPP_CONFIG")]
    config: Option<PathBuf>,

    /// Override the WebSocket listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration file and exit without starting the server.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── Configuration ──────────────────────────────────────────
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let (mut config, load_error) = match AppConfig::load(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging);
    match load_error {
        None => info!("Configuration loaded from {}", config_path.display()),
        Some(e) => {
            error!("Failed to load config from {}: {}", config_path.display(), e);
            error!("Using default configuration.");
        }
    }
    config.validate()?;

    if cli.check {
        println!("Configuration is valid");
        println!("   Config file  : {}", config_path.display());
        println!("   WS address   : {}", config.server.address());
        println!("   Call timeout : {}s", config.session.call_timeout_secs);
        println!("   Busy policy  : {:?}", config.session.busy_policy);
        println!("   Log level    : {}", config.logging.level);
        return Ok(());
    }

    if install_metrics(&config.metrics)? {
        info!("Metrics enabled");
    }

    // ── Start server ───────────────────────────────────────────
    let mut dispatchers = VersionDispatchers::new();
    dispatchers
        .insert(Dispatcher::new(v16_registry()?))
        .insert(Dispatcher::new(v201_registry()?));

    let handle = ServerHandle::start(ServerOptions {
        config,
        dispatchers,
    })
    .await?;
    handle.install_signal_handler();
    log_session_events(handle.events.clone());

    info!(address = %handle.local_addr, "Press Ctrl+C to shutdown gracefully.");

    handle.shutdown_signal().wait().await;
    handle.wait().await;

    Ok(())
}

fn log_session_events(events: SharedEventBus) {
    let mut subscriber = events.subscribe();
    tokio::spawn(async move {
        while let Some(message) = subscriber.recv().await {
            debug!(
                event = message.event.event_type(),
                charge_point_id = message.event.charge_point_id(),
                "Session event"
            );
        }
    });
}

fn v16_registry() -> Result<ocpp_exchange::application::SharedActionRegistry, RegistryError> {
    let next_transaction_id = Arc::new(AtomicI32::new(1));

    let mut builder = ActionRegistry::builder(OcppVersion::V16, Role::CentralSystem);
    builder
        .register(handler_fn(|session, req: v16::BootNotificationRequest| async move {
            info!(
                %session,
                vendor = req.charge_point_vendor.as_str(),
                model = req.charge_point_model.as_str(),
                "BootNotification"
            );
            Ok::<_, HandlerError>(v16::BootNotificationResponse {
                status: v16::RegistrationStatus::Accepted,
                current_time: Utc::now(),
                interval: HEARTBEAT_INTERVAL_SECS,
            })
        }))?
        .register(handler_fn(|_session, _req: v16::HeartbeatRequest| async move {
            Ok::<_, HandlerError>(v16::HeartbeatResponse {
                current_time: Utc::now(),
            })
        }))?
        .register(handler_fn(|session, req: v16::AuthorizeRequest| async move {
            info!(%session, id_tag = req.id_tag.as_str(), "Authorize");
            Ok::<_, HandlerError>(v16::AuthorizeResponse {
                id_tag_info: v16::IdTagInfo::with_status(v16::AuthorizationStatus::Accepted),
            })
        }))?
        .register(handler_fn(|session, req: v16::StatusNotificationRequest| async move {
            info!(%session, connector_id = req.connector_id, status = ?req.status, "StatusNotification");
            Ok::<_, HandlerError>(v16::StatusNotificationResponse {})
        }))?
        .register(handler_fn(move |session, req: v16::StartTransactionRequest| {
            let transaction_id = next_transaction_id.fetch_add(1, Ordering::Relaxed);
            async move {
                info!(
                    %session,
                    connector_id = req.connector_id,
                    transaction_id,
                    "StartTransaction"
                );
                Ok::<_, HandlerError>(v16::StartTransactionResponse {
                    id_tag_info: v16::IdTagInfo::with_status(v16::AuthorizationStatus::Accepted),
                    transaction_id,
                })
            }
        }))?
        .register(handler_fn(|session, req: v16::StopTransactionRequest| async move {
            info!(%session, transaction_id = req.transaction_id, meter_stop = req.meter_stop, "StopTransaction");
            Ok::<_, HandlerError>(v16::StopTransactionResponse::default())
        }))?
        .register(handler_fn(|_session, _req: v16::MeterValuesRequest| async move {
            Ok::<_, HandlerError>(v16::MeterValuesResponse {})
        }))?;
    Ok(builder.build())
}

fn v201_registry() -> Result<ocpp_exchange::application::SharedActionRegistry, RegistryError> {
    let mut builder = ActionRegistry::builder(OcppVersion::V201, Role::CentralSystem);
    builder
        .register(handler_fn(|session, req: v201::BootNotificationRequest| async move {
            info!(
                %session,
                vendor = req.charging_station.vendor_name.as_str(),
                model = req.charging_station.model.as_str(),
                reason = ?req.reason,
                "BootNotification"
            );
            Ok::<_, HandlerError>(v201::BootNotificationResponse {
                current_time: Utc::now(),
                interval: HEARTBEAT_INTERVAL_SECS,
                status: v201::RegistrationStatus::Accepted,
                status_info: None,
            })
        }))?
        .register(handler_fn(|_session, _req: v201::HeartbeatRequest| async move {
            Ok::<_, HandlerError>(v201::HeartbeatResponse {
                current_time: Utc::now(),
            })
        }))?
        .register(handler_fn(|session, req: v201::AuthorizeRequest| async move {
            info!(%session, id_token = req.id_token.id_token.as_str(), "Authorize");
            Ok::<_, HandlerError>(v201::AuthorizeResponse {
                id_token_info: v201::IdTokenInfo::with_status(v201::AuthorizationStatus::Accepted),
            })
        }))?
        .register(handler_fn(|session, req: v201::StatusNotificationRequest| async move {
            info!(%session, evse_id = req.evse_id, status = ?req.connector_status, "StatusNotification");
            Ok::<_, HandlerError>(v201::StatusNotificationResponse {})
        }))?
        .register(handler_fn(|session, req: v201::TransactionEventRequest| async move {
            info!(
                %session,
                transaction_id = req.transaction_info.transaction_id.as_str(),
                event_type = ?req.event_type,
                seq_no = req.seq_no,
                "TransactionEvent"
            );
            Ok::<_, HandlerError>(v201::TransactionEventResponse::default())
        }))?;
    Ok(builder.build())
}
