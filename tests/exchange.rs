//! End-to-end exchanges between a charge-point session and a central-system
//! session, wired back to back over in-memory channels and over a real
//! WebSocket.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use ocpp_exchange::config::AppConfig;
use ocpp_exchange::interfaces::ws::Disconnect;
use ocpp_exchange::messages::v16;
use ocpp_exchange::server::{ServerHandle, ServerOptions};
use ocpp_exchange::support::ocpp_frame::OcppFrame;
use ocpp_exchange::{
    handler_fn, ActionRegistry, BusyPolicy, CallFailure, Dispatcher, ErrorCode, HandlerError,
    OcppClient, OcppClientOptions, OcppVersion, Role, Session, SessionConfig, VersionDispatchers,
};

// ── Fixtures ───────────────────────────────────────────────────

fn authorize(id_tag: &str) -> v16::AuthorizeRequest {
    v16::AuthorizeRequest {
        id_tag: id_tag.into(),
    }
}

fn authorize_handler(
    builder: &mut ocpp_exchange::application::ActionRegistryBuilder,
) -> &mut ocpp_exchange::application::ActionRegistryBuilder {
    builder
        .register(handler_fn(|_s, req: v16::AuthorizeRequest| async move {
            let status = if req.id_tag == "ABC123" {
                v16::AuthorizationStatus::Accepted
            } else {
                v16::AuthorizationStatus::Invalid
            };
            Ok::<_, HandlerError>(v16::AuthorizeResponse {
                id_tag_info: v16::IdTagInfo::with_status(status),
            })
        }))
        .unwrap()
}

fn central_system() -> Dispatcher {
    let mut builder = ActionRegistry::builder(OcppVersion::V16, Role::CentralSystem);
    authorize_handler(&mut builder)
        .register(handler_fn(|_s, _req: v16::BootNotificationRequest| async move {
            Ok::<_, HandlerError>(v16::BootNotificationResponse {
                status: v16::RegistrationStatus::Accepted,
                current_time: Utc::now(),
                interval: 300,
            })
        }))
        .unwrap();
    Dispatcher::new(builder.build())
}

fn charge_point() -> Dispatcher {
    let mut builder = ActionRegistry::builder(OcppVersion::V16, Role::ChargePoint);
    builder
        .register(handler_fn(|_s, req: v16::ResetRequest| async move {
            let status = match req.kind {
                v16::ResetType::Soft => v16::ResetStatus::Accepted,
                v16::ResetType::Hard => v16::ResetStatus::Rejected,
            };
            Ok::<_, HandlerError>(v16::ResetResponse { status })
        }))
        .unwrap();
    Dispatcher::new(builder.build())
}

/// Forward every frame `rx` carries into `peer`, one at a time.
fn forward(mut rx: mpsc::UnboundedReceiver<String>, peer: Session) {
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            peer.handle_text(&text).await;
        }
    });
}

/// Charge point and central system sessions talking to each other.
fn back_to_back(
    cp_dispatcher: Dispatcher,
    cs_dispatcher: Dispatcher,
    cp_config: SessionConfig,
) -> (Session, Session) {
    back_to_back_with(cp_dispatcher, cs_dispatcher, cp_config, SessionConfig::default())
}

fn back_to_back_with(
    cp_dispatcher: Dispatcher,
    cs_dispatcher: Dispatcher,
    cp_config: SessionConfig,
    cs_config: SessionConfig,
) -> (Session, Session) {
    let (cp_tx, cp_rx) = mpsc::unbounded_channel();
    let (cs_tx, cs_rx) = mpsc::unbounded_channel();

    let cp = Session::builder("CP001", cp_dispatcher)
        .config(cp_config)
        .open(cp_tx);
    let cs = Session::builder("CP001", cs_dispatcher)
        .config(cs_config)
        .open(cs_tx);

    forward(cp_rx, cs.clone());
    forward(cs_rx, cp.clone());
    (cp, cs)
}

// ── In-memory ──────────────────────────────────────────────────

#[tokio::test]
async fn authorize_is_answered_by_the_central_system() {
    let (cp, _cs) = back_to_back(charge_point(), central_system(), SessionConfig::default());

    let accepted = cp.call(authorize("ABC123")).await.unwrap();
    assert_eq!(accepted.id_tag_info.status, v16::AuthorizationStatus::Accepted);

    let refused = cp.call(authorize("NOPE")).await.unwrap();
    assert_eq!(refused.id_tag_info.status, v16::AuthorizationStatus::Invalid);
    assert_eq!(cp.pending_call_id(), None);
}

#[tokio::test]
async fn central_system_can_call_the_charge_point() {
    let (_cp, cs) = back_to_back(charge_point(), central_system(), SessionConfig::default());

    let soft = cs
        .call(v16::ResetRequest {
            kind: v16::ResetType::Soft,
        })
        .await
        .unwrap();
    assert_eq!(soft.status, v16::ResetStatus::Accepted);

    let hard = cs
        .call(v16::ResetRequest {
            kind: v16::ResetType::Hard,
        })
        .await
        .unwrap();
    assert_eq!(hard.status, v16::ResetStatus::Rejected);
}

#[tokio::test]
async fn known_action_without_handler_is_not_supported() {
    let (cp, _cs) = back_to_back(charge_point(), central_system(), SessionConfig::default());

    let err = cp
        .call(v16::HeartbeatRequest {})
        .await
        .unwrap_err();
    match err {
        CallFailure::CallError { code, .. } => assert_eq!(code, ErrorCode::NotSupported),
        other => panic!("expected CallError, got {:?}", other),
    }
    assert!(cp.is_open());
}

#[tokio::test]
async fn unknown_action_is_not_implemented() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cs = Session::builder("CP001", central_system()).open(tx);

    cs.handle_text(r#"[2,"u-1","Frobnicate",{}]"#).await;

    let reply = OcppFrame::parse(&rx.recv().await.unwrap()).unwrap();
    match reply {
        OcppFrame::CallError {
            unique_id,
            error_code,
            ..
        } => {
            assert_eq!(unique_id, "u-1");
            assert_eq!(error_code, "NotImplemented");
        }
        other => panic!("expected CallError, got {:?}", other),
    }
}

#[tokio::test]
async fn second_call_is_busy_while_first_is_outstanding() {
    let release = Arc::new(Notify::new());
    let gate = release.clone();

    let mut builder = ActionRegistry::builder(OcppVersion::V16, Role::CentralSystem);
    builder
        .register(handler_fn(move |_s, _req: v16::AuthorizeRequest| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok::<_, HandlerError>(v16::AuthorizeResponse {
                    id_tag_info: v16::IdTagInfo::with_status(v16::AuthorizationStatus::Accepted),
                })
            }
        }))
        .unwrap();

    let config = SessionConfig::default().with_busy_policy(BusyPolicy::Reject);
    let (cp, _cs) = back_to_back(charge_point(), Dispatcher::new(builder.build()), config);

    let first = cp.send(authorize("ABC123"));
    let second = cp.call(authorize("ABC123")).await;
    assert_eq!(second.unwrap_err(), CallFailure::Busy);

    release.notify_one();
    let confirmation = first.await.unwrap();
    assert_eq!(
        confirmation.id_tag_info.status,
        v16::AuthorizationStatus::Accepted
    );
}

#[tokio::test(start_paused = true)]
async fn slow_central_system_times_out_the_call() {
    let mut builder = ActionRegistry::builder(OcppVersion::V16, Role::CentralSystem);
    builder
        .register(handler_fn(|_s, _req: v16::AuthorizeRequest| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, HandlerError>(v16::AuthorizeResponse {
                id_tag_info: v16::IdTagInfo::with_status(v16::AuthorizationStatus::Accepted),
            })
        }))
        .unwrap();

    let config = SessionConfig::default().with_call_timeout(Duration::from_secs(5));
    let (cp, _cs) = back_to_back(charge_point(), Dispatcher::new(builder.build()), config);

    let started = tokio::time::Instant::now();
    let err = cp.call(authorize("ABC123")).await.unwrap_err();
    assert_eq!(err, CallFailure::Timeout);
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(cp.pending_call_id(), None);
}

#[tokio::test(start_paused = true)]
async fn slow_inbound_handler_does_not_hold_up_replies() {
    let mut builder = ActionRegistry::builder(OcppVersion::V16, Role::CentralSystem);
    builder
        .register(handler_fn(|_s, _req: v16::AuthorizeRequest| async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, HandlerError>(v16::AuthorizeResponse {
                id_tag_info: v16::IdTagInfo::with_status(v16::AuthorizationStatus::Accepted),
            })
        }))
        .unwrap();

    let cs_config = SessionConfig::default().with_call_timeout(Duration::from_secs(5));
    let (cp, cs) = back_to_back_with(
        charge_point(),
        Dispatcher::new(builder.build()),
        SessionConfig::default(),
        cs_config,
    );

    // The central system is busy answering this for 10s.
    let slow = cp.send(authorize("ABC123"));
    tokio::task::yield_now().await;

    let started = tokio::time::Instant::now();
    let reset = cs
        .call(v16::ResetRequest {
            kind: v16::ResetType::Soft,
        })
        .await
        .unwrap();
    assert_eq!(reset.status, v16::ResetStatus::Accepted);
    assert!(started.elapsed() < Duration::from_secs(5));

    let confirmation = slow.await.unwrap();
    assert_eq!(
        confirmation.id_tag_info.status,
        v16::AuthorizationStatus::Accepted
    );
}

#[tokio::test]
async fn closing_the_session_rejects_the_outstanding_call() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let cp = Session::builder("CP001", charge_point()).open(tx);

    let pending = cp.send(authorize("ABC123"));
    assert_eq!(cp.close(), 1);
    assert_eq!(pending.await.unwrap_err(), CallFailure::ConnectionClosing);

    let after = cp.call(authorize("ABC123")).await.unwrap_err();
    assert_eq!(after, CallFailure::ConnectionClosing);
}

// ── WebSocket ──────────────────────────────────────────────────

async fn start_server() -> ServerHandle {
    let mut config = AppConfig::default();
    config.server.host = "127.0.0.1".into();
    config.server.port = 0;
    config.server.shutdown_timeout = 5;

    let mut dispatchers = VersionDispatchers::new();
    dispatchers.insert(central_system());

    ServerHandle::start(ServerOptions {
        config,
        dispatchers,
    })
    .await
    .unwrap()
}

async fn wait_for_session(handle: &ServerHandle, charge_point_id: &str) -> Session {
    for _ in 0..100 {
        if let Some(session) = handle.sessions.get(charge_point_id) {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never registered", charge_point_id);
}

#[tokio::test]
async fn websocket_exchange_in_both_directions() {
    let server = start_server().await;
    let base_url = format!("ws://{}/ocpp", server.local_addr);

    let client = OcppClient::connect(
        &base_url,
        "CP042",
        charge_point(),
        OcppClientOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(client.session.version(), OcppVersion::V16);

    let boot = client
        .session
        .call(v16::BootNotificationRequest::new("Acme", "Model-X"))
        .await
        .unwrap();
    assert_eq!(boot.status, v16::RegistrationStatus::Accepted);
    assert_eq!(boot.interval, 300);

    let remote = wait_for_session(&server, "CP042").await;
    assert_eq!(remote.role(), Role::CentralSystem);
    let reset = remote
        .call(v16::ResetRequest {
            kind: v16::ResetType::Soft,
        })
        .await
        .unwrap();
    assert_eq!(reset.status, v16::ResetStatus::Accepted);

    server.shutdown().await;
    let outcome = client.connection.await.unwrap();
    assert!(matches!(
        outcome,
        Disconnect::PeerClosed | Disconnect::TransportError
    ));
}

#[tokio::test]
async fn handshake_without_charge_point_id_is_refused() {
    let server = start_server().await;
    let url = format!("ws://{}/", server.local_addr);

    let result = OcppClient::connect(&url, "", charge_point(), OcppClientOptions::default()).await;
    assert!(result.is_err());

    server.shutdown().await;
}

#[test]
fn wire_payloads_use_ocpp_field_names() {
    let boot = v16::BootNotificationRequest::new("Acme", "Model-X");
    let value: Value = serde_json::to_value(&boot).unwrap();
    assert_eq!(
        value,
        json!({"chargePointVendor": "Acme", "chargePointModel": "Model-X"})
    );
}
