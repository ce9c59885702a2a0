//! One logical OCPP connection
//!
//! A [`Session`] owns the pending-call table, the bounded queue of calls
//! waiting for the slot, and the `Open -> Closing -> Closed` lifecycle.
//! Inbound text is fed in by the transport through
//! [`handle_text`](Session::handle_text); outbound text leaves through the
//! `mpsc` sender handed to [`SessionBuilder::open`], the same channel the
//! WebSocket writer task drains.
//!
//! Replies settle the pending call as soon as they are read. Inbound calls
//! go to a per-session worker that answers them one at a time, so a slow
//! handler never holds up the reply to our own outstanding call.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pending::{PendingCall, PendingCallTable, Responder, Settled};
use super::supervisor::TimeoutSupervisor;
use crate::application::dispatcher::Dispatcher;
use crate::application::events::{SessionEvent, SharedEventBus};
use crate::domain::{ErrorCode, OcppRequest, OcppVersion, Role, SessionId, SessionState};
use crate::support::errors::CallFailure;
use crate::support::ocpp_frame::{JsonCodec, OcppFrame, WireCodec};
use crate::support::payload::{decode_payload, encode_payload, validate_payload};
use crate::support::retry::{retry_with_backoff, RetryConfig};

/// What `send` does while another call is outstanding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Wait in a bounded FIFO queue; overflow fails with `Busy`.
    #[default]
    Queue,
    /// Fail immediately with `Busy`.
    Reject,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub call_timeout: Duration,
    pub busy_policy: BusyPolicy,
    pub queue_capacity: usize,
    /// Backoff used by [`Session::call_with_retry`].
    pub transaction_retry: RetryConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            busy_policy: BusyPolicy::Queue,
            queue_capacity: 16,
            transaction_retry: RetryConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }
}

/// Outcome of one outbound call. Dropping it does not cancel the call;
/// the slot is still held until the reply or the deadline.
pub struct CallFuture<C> {
    rx: oneshot::Receiver<Result<C, CallFailure>>,
}

impl<C> Future for CallFuture<C> {
    type Output = Result<C, CallFailure>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Responder dropped unsent: the session went away underneath.
            Poll::Ready(Err(_)) => Poll::Ready(Err(CallFailure::ConnectionClosing)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A call from the peer waiting for the call worker.
struct InboundCall {
    unique_id: String,
    action: String,
    payload: Value,
}

/// A call waiting for the slot.
struct QueuedCall {
    action: &'static str,
    payload: Value,
    responder: Responder,
}

impl QueuedCall {
    fn fail(self, failure: CallFailure) {
        (self.responder)(Err(failure));
    }
}

struct SessionInner {
    id: SessionId,
    charge_point_id: String,
    role: Role,
    version: OcppVersion,
    opened_at: DateTime<Utc>,
    config: SessionConfig,
    state: AtomicU8,
    codec: Arc<dyn WireCodec>,
    dispatcher: Dispatcher,
    supervisor: TimeoutSupervisor,
    events: Option<SharedEventBus>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Feeds the call worker; started on the first inbound call.
    inbound: Mutex<Option<mpsc::UnboundedSender<InboundCall>>>,
    /// Lock order: `queue` before the pending table.
    queue: Mutex<VecDeque<QueuedCall>>,
    pending: PendingCallTable,
}

/// Cheap to clone; every clone drives the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub struct SessionBuilder {
    charge_point_id: String,
    dispatcher: Dispatcher,
    config: SessionConfig,
    codec: Arc<dyn WireCodec>,
    supervisor: TimeoutSupervisor,
    events: Option<SharedEventBus>,
}

impl SessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn WireCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn supervisor(mut self, supervisor: TimeoutSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Start the session in `Open`, transmitting through `outbound`.
    pub fn open(self, outbound: mpsc::UnboundedSender<String>) -> Session {
        let registry = self.dispatcher.registry();
        let inner = SessionInner {
            id: SessionId::new(),
            role: registry.role(),
            version: registry.version(),
            charge_point_id: self.charge_point_id,
            opened_at: Utc::now(),
            config: self.config,
            state: AtomicU8::new(SessionState::Open as u8),
            codec: self.codec,
            dispatcher: self.dispatcher,
            supervisor: self.supervisor,
            events: self.events,
            outbound: Mutex::new(Some(outbound)),
            inbound: Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            pending: PendingCallTable::new(),
        };

        info!(
            session_id = %inner.id,
            charge_point_id = inner.charge_point_id.as_str(),
            version = %inner.version,
            role = %inner.role,
            "Session opened"
        );
        inner.publish(SessionEvent::Opened {
            session_id: inner.id,
            charge_point_id: inner.charge_point_id.clone(),
            version: inner.version,
            role: inner.role,
        });

        Session {
            inner: Arc::new(inner),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Session {
    /// Version and role are taken from the dispatcher's registry.
    pub fn builder(charge_point_id: impl Into<String>, dispatcher: Dispatcher) -> SessionBuilder {
        SessionBuilder {
            charge_point_id: charge_point_id.into(),
            dispatcher,
            config: SessionConfig::default(),
            codec: Arc::new(JsonCodec),
            supervisor: TimeoutSupervisor::new(),
            events: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn charge_point_id(&self) -> &str {
        &self.inner.charge_point_id
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn version(&self) -> OcppVersion {
        self.inner.version
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.inner.opened_at
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Id of the call currently holding the slot.
    pub fn pending_call_id(&self) -> Option<String> {
        self.inner.pending.outstanding_id()
    }

    /// Calls waiting for the slot.
    pub fn queued(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    pub fn same_as(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Issue `request` to the peer.
    ///
    /// Returns immediately. The call is transmitted now if the slot is
    /// free, otherwise queued or refused with `Busy` per [`BusyPolicy`].
    pub fn send<R: OcppRequest>(&self, request: R) -> CallFuture<R::Confirmation> {
        let (tx, rx) = oneshot::channel();

        if let Err(err) = validate_payload(&request) {
            warn!(
                charge_point_id = self.charge_point_id(),
                action = R::ACTION,
                error = %err,
                "Refusing to send invalid request"
            );
            let _ = tx.send(Err(CallFailure::InvalidRequest(err)));
            return CallFuture { rx };
        }

        let payload = match encode_payload(&request) {
            Ok(payload) => payload,
            Err(err) => {
                let _ = tx.send(Err(CallFailure::InvalidRequest(err)));
                return CallFuture { rx };
            }
        };

        let responder: Responder = Box::new(move |outcome: Result<Value, CallFailure>| {
            let outcome = outcome.and_then(|payload| {
                let confirmation: R::Confirmation =
                    decode_payload(payload).map_err(CallFailure::InvalidConfirmation)?;
                validate_payload(&confirmation).map_err(CallFailure::InvalidConfirmation)?;
                Ok(confirmation)
            });
            let _ = tx.send(outcome);
        });

        self.inner.submit(QueuedCall {
            action: R::ACTION,
            payload,
            responder,
        });
        CallFuture { rx }
    }

    /// [`send`](Self::send) and wait for the confirmation.
    pub async fn call<R: OcppRequest>(&self, request: R) -> Result<R::Confirmation, CallFailure> {
        self.send(request).await
    }

    /// Like [`call`](Self::call), but a transaction-related request that
    /// times out or finds the session busy is sent again with backoff.
    /// Other requests get a single attempt.
    pub async fn call_with_retry<R>(&self, request: R) -> Result<R::Confirmation, CallFailure>
    where
        R: OcppRequest + Clone,
    {
        if !request.is_transaction_related() {
            return self.call(request).await;
        }

        retry_with_backoff(
            &self.inner.config.transaction_retry,
            || self.send(request.clone()),
            |failure: &CallFailure| failure.is_transient() && self.is_open(),
            R::ACTION,
        )
        .await
    }

    /// Feed one text message received from the transport.
    pub async fn handle_text(&self, text: &str) {
        match self.inner.codec.decode(text) {
            Ok(frame) => self.on_frame(frame).await,
            Err(err) => self.inner.on_malformed(text, err.error_code(), &err.to_string()),
        }
    }

    /// Route a decoded frame: calls to the call worker, replies to the
    /// pending-call table. Never waits on a handler.
    pub async fn on_frame(&self, frame: OcppFrame) {
        match frame {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                if !self.is_open() {
                    debug!(
                        charge_point_id = self.charge_point_id(),
                        message_id = unique_id.as_str(),
                        action = action.as_str(),
                        "Ignoring call on closing session"
                    );
                    return;
                }
                self.inner.enqueue_call(InboundCall {
                    unique_id,
                    action,
                    payload,
                });
            }
            OcppFrame::CallResult { unique_id, payload } => {
                let settled = self.inner.pending.resolve(&unique_id, payload);
                self.inner.after_reply(&unique_id, settled);
            }
            OcppFrame::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => {
                let failure = CallFailure::CallError {
                    code: ErrorCode::parse(&error_code),
                    description: error_description,
                    details: error_details,
                };
                let settled = self.inner.pending.reject(&unique_id, failure);
                self.inner.after_reply(&unique_id, settled);
            }
        }
    }

    /// Move to `Closing`, reject the pending call and every queued call
    /// with `ConnectionClosing`, then move to `Closed` and release the
    /// outbound channel. Returns how many calls were abandoned; closing
    /// twice is a no-op.
    pub fn close(&self) -> usize {
        let inner = &self.inner;
        if !inner.advance(SessionState::Closing) {
            return 0;
        }
        debug!(charge_point_id = self.charge_point_id(), "Session closing");

        let mut abandoned = 0;
        {
            let mut queue = lock(&inner.queue);
            if let Some(call) = inner.pending.take_any() {
                call.settle(Err(CallFailure::ConnectionClosing));
                abandoned += 1;
            }
            for queued in queue.drain(..) {
                queued.fail(CallFailure::ConnectionClosing);
                abandoned += 1;
            }
        }

        lock(&inner.inbound).take();
        lock(&inner.outbound).take();
        inner.advance(SessionState::Closed);

        info!(
            session_id = %inner.id,
            charge_point_id = self.charge_point_id(),
            abandoned,
            "Session closed"
        );
        inner.publish(SessionEvent::Closed {
            session_id: inner.id,
            charge_point_id: inner.charge_point_id.clone(),
            abandoned_calls: abandoned,
        });
        abandoned
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("charge_point_id", &self.inner.charge_point_id)
            .field("version", &self.inner.version)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionInner {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move forward to `to`. `false` if already there or beyond.
    fn advance(&self, to: SessionState) -> bool {
        self.state.fetch_max(to as u8, Ordering::SeqCst) < to as u8
    }

    fn publish(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    fn transmit(&self, text: String) -> Result<(), CallFailure> {
        match lock(&self.outbound).as_ref() {
            Some(sender) => sender
                .send(text)
                .map_err(|_| CallFailure::Transport("outbound channel closed".into())),
            None => Err(CallFailure::Transport("session closed".into())),
        }
    }

    fn enqueue_call(self: &Arc<Self>, call: InboundCall) {
        let mut inbound = lock(&self.inbound);
        if self.state() != SessionState::Open {
            return;
        }
        if inbound.is_none() {
            *inbound = self.spawn_call_worker();
        }
        let Some(sender) = inbound.as_ref() else {
            warn!(
                charge_point_id = self.charge_point_id.as_str(),
                message_id = call.unique_id.as_str(),
                action = call.action.as_str(),
                "No runtime to answer call, dropping it"
            );
            return;
        };
        if sender.send(call).is_err() {
            warn!(
                charge_point_id = self.charge_point_id.as_str(),
                "Call worker stopped"
            );
        }
    }

    fn spawn_call_worker(self: &Arc<Self>) -> Option<mpsc::UnboundedSender<InboundCall>> {
        let runtime = self.supervisor.runtime()?;
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundCall>();
        let session = Arc::downgrade(self);
        runtime.spawn(async move {
            while let Some(call) = rx.recv().await {
                let Some(inner) = session.upgrade() else {
                    break;
                };
                inner.answer(call).await;
            }
        });
        Some(tx)
    }

    async fn answer(&self, call: InboundCall) {
        let InboundCall {
            unique_id,
            action,
            payload,
        } = call;
        if self.state() != SessionState::Open {
            debug!(
                charge_point_id = self.charge_point_id.as_str(),
                message_id = unique_id.as_str(),
                action = action.as_str(),
                "Session closed before call was answered"
            );
            return;
        }

        let reply = self
            .dispatcher
            .dispatch(self.id, &unique_id, &action, payload)
            .await;
        if let Err(err) = self.transmit(self.codec.encode(&reply)) {
            warn!(
                charge_point_id = self.charge_point_id.as_str(),
                message_id = unique_id.as_str(),
                action = action.as_str(),
                error = %err,
                "Failed to send reply"
            );
        }
    }

    fn submit(self: &Arc<Self>, call: QueuedCall) {
        let mut queue = lock(&self.queue);

        if self.state() != SessionState::Open {
            call.fail(CallFailure::ConnectionClosing);
            return;
        }

        if queue.is_empty() && self.pending.is_free() {
            self.start(call);
            return;
        }

        match self.config.busy_policy {
            BusyPolicy::Queue if queue.len() < self.config.queue_capacity => {
                debug!(
                    charge_point_id = self.charge_point_id.as_str(),
                    action = call.action,
                    queued = queue.len() + 1,
                    "Slot busy, call queued"
                );
                queue.push_back(call);
            }
            _ => {
                debug!(
                    charge_point_id = self.charge_point_id.as_str(),
                    action = call.action,
                    "Slot busy, call refused"
                );
                call.fail(CallFailure::Busy);
            }
        }
    }

    /// Reserve the slot, arm the deadline and transmit. Must be called
    /// with the queue locked.
    fn start(self: &Arc<Self>, call: QueuedCall) {
        let unique_id = Uuid::new_v4().to_string();
        let pending = PendingCall::new(
            unique_id.clone(),
            call.action,
            self.config.call_timeout,
            call.responder,
        );
        // Arm first: a call that cannot time out never takes the slot.
        let session = Arc::downgrade(self);
        let expiring_id = unique_id.clone();
        let expiry = match self.supervisor.schedule(pending.deadline, move || {
            expire(session, &expiring_id);
        }) {
            Ok(expiry) => expiry,
            Err(err) => {
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    action = call.action,
                    error = %err,
                    "Cannot arm call timer"
                );
                pending.settle(Err(CallFailure::Transport(err.to_string())));
                return;
            }
        };

        if let Err(pending) = self.pending.reserve(pending) {
            expiry.abort();
            pending.settle(Err(CallFailure::Busy));
            return;
        }
        if !self.pending.attach_expiry(&unique_id, expiry.clone()) {
            expiry.abort();
        }

        let frame = OcppFrame::call(unique_id.as_str(), call.action, call.payload);
        metrics::counter!("ocpp_calls_sent_total", "action" => call.action).increment(1);
        debug!(
            charge_point_id = self.charge_point_id.as_str(),
            message_id = unique_id.as_str(),
            action = call.action,
            "Sending call"
        );

        if let Err(err) = self.transmit(self.codec.encode(&frame)) {
            warn!(
                charge_point_id = self.charge_point_id.as_str(),
                message_id = unique_id.as_str(),
                action = call.action,
                error = %err,
                "Failed to transmit call"
            );
            if let Some(pending) = self.pending.take(&unique_id) {
                pending.settle(Err(err));
            }
        }
    }

    /// Hand the free slot to queued calls, oldest first.
    fn pump(self: &Arc<Self>) {
        let mut queue = lock(&self.queue);
        while self.state() == SessionState::Open && self.pending.is_free() {
            match queue.pop_front() {
                Some(next) => self.start(next),
                None => break,
            }
        }
    }

    fn after_reply(self: &Arc<Self>, unique_id: &str, settled: Option<Settled>) {
        match settled {
            Some(settled) => {
                metrics::histogram!("ocpp_call_latency_seconds", "action" => settled.action)
                    .record(settled.elapsed.as_secs_f64());
                debug!(
                    charge_point_id = self.charge_point_id.as_str(),
                    message_id = unique_id,
                    action = settled.action,
                    elapsed_ms = settled.elapsed.as_millis() as u64,
                    "Call settled"
                );
                self.pump();
            }
            None => {
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    message_id = unique_id,
                    outstanding = ?self.pending.outstanding_id(),
                    "Response matches no pending call"
                );
                metrics::counter!("ocpp_unmatched_responses_total").increment(1);
                self.publish(SessionEvent::UnmatchedResponse {
                    session_id: self.id,
                    charge_point_id: self.charge_point_id.clone(),
                    unique_id: unique_id.to_string(),
                });
            }
        }
    }

    fn on_malformed(&self, text: &str, code: ErrorCode, reason: &str) {
        match OcppFrame::salvage_header(text) {
            // Replies are never answered, only requests and unknown types.
            Some((msg_type, unique_id)) if msg_type != 3 && msg_type != 4 => {
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    message_id = unique_id.as_str(),
                    error = reason,
                    "Malformed frame, answering with CallError"
                );
                let reply = OcppFrame::error_response(unique_id, code, self.version, json!({}));
                if let Err(err) = self.transmit(self.codec.encode(&reply)) {
                    warn!(error = %err, "Failed to send CallError");
                }
            }
            _ => {
                warn!(
                    charge_point_id = self.charge_point_id.as_str(),
                    error = reason,
                    "Dropping malformed frame"
                );
            }
        }
    }
}

fn expire(session: Weak<SessionInner>, unique_id: &str) {
    let Some(inner) = session.upgrade() else {
        return;
    };
    if let Some(settled) = inner.pending.expire(unique_id) {
        metrics::counter!("ocpp_call_timeouts_total", "action" => settled.action).increment(1);
        warn!(
            charge_point_id = inner.charge_point_id.as_str(),
            message_id = unique_id,
            action = settled.action,
            "Call timed out"
        );
        inner.pump();
    }
}
