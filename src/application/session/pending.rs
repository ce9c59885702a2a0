//! Pending-call table
//!
//! Holds the single outstanding outbound call of a session. Every call
//! leaves the table exactly once, through [`resolve`](PendingCallTable::resolve),
//! [`reject`](PendingCallTable::reject), [`expire`](PendingCallTable::expire)
//! or [`take`](PendingCallTable::take): the entry is moved out of the slot
//! under the lock, so whichever path gets there first owns the result and
//! every later attempt for the same id finds nothing.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::support::errors::CallFailure;

/// Delivers the raw outcome of a call to whoever is awaiting it. Decoding
/// into the expected confirmation type happens inside.
pub type Responder = Box<dyn FnOnce(Result<Value, CallFailure>) + Send>;

/// An outstanding request awaiting its correlated reply.
pub struct PendingCall {
    pub unique_id: String,
    pub action: &'static str,
    pub created_at: Instant,
    pub deadline: Instant,
    responder: Responder,
    expiry: Option<AbortHandle>,
}

impl PendingCall {
    pub fn new(
        unique_id: impl Into<String>,
        action: &'static str,
        timeout: Duration,
        responder: Responder,
    ) -> Self {
        let created_at = Instant::now();
        Self {
            unique_id: unique_id.into(),
            action,
            created_at,
            deadline: created_at + timeout,
            responder,
            expiry: None,
        }
    }

    /// Deliver `outcome` and cancel the scheduled expiry, if any.
    pub fn settle(self, outcome: Result<Value, CallFailure>) -> Settled {
        if let Some(expiry) = &self.expiry {
            expiry.abort();
        }
        let settled = Settled {
            unique_id: self.unique_id,
            action: self.action,
            elapsed: self.created_at.elapsed(),
        };
        (self.responder)(outcome);
        settled
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("unique_id", &self.unique_id)
            .field("action", &self.action)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// What is left of a call after it has been settled.
#[derive(Debug, Clone, PartialEq)]
pub struct Settled {
    pub unique_id: String,
    pub action: &'static str,
    pub elapsed: Duration,
}

/// At most one [`PendingCall`] per session.
#[derive(Default)]
pub struct PendingCallTable {
    slot: Mutex<Option<PendingCall>>,
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<PendingCall>> {
        // A responder never runs under this lock, so a poisoned slot still
        // holds consistent data.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Occupy the slot. Hands the call back if another one is outstanding.
    pub fn reserve(&self, call: PendingCall) -> Result<(), PendingCall> {
        let mut slot = self.lock();
        if slot.is_some() {
            return Err(call);
        }
        *slot = Some(call);
        Ok(())
    }

    /// Attach the expiry timer of call `unique_id`. Returns `false` when
    /// that call already left the table; the caller must cancel the timer.
    pub fn attach_expiry(&self, unique_id: &str, expiry: AbortHandle) -> bool {
        match self.lock().as_mut() {
            Some(call) if call.unique_id == unique_id => {
                call.expiry = Some(expiry);
                true
            }
            _ => false,
        }
    }

    /// Remove the call if `unique_id` is the outstanding one.
    pub fn take(&self, unique_id: &str) -> Option<PendingCall> {
        let mut slot = self.lock();
        match slot.as_ref() {
            Some(call) if call.unique_id == unique_id => slot.take(),
            _ => None,
        }
    }

    /// Remove whatever call is outstanding.
    pub fn take_any(&self) -> Option<PendingCall> {
        self.lock().take()
    }

    /// Fulfil call `unique_id` with its raw result payload. `None` means the
    /// id matched nothing and no call was touched.
    pub fn resolve(&self, unique_id: &str, payload: Value) -> Option<Settled> {
        self.take(unique_id).map(|call| call.settle(Ok(payload)))
    }

    pub fn reject(&self, unique_id: &str, failure: CallFailure) -> Option<Settled> {
        self.take(unique_id).map(|call| call.settle(Err(failure)))
    }

    /// Reject call `unique_id` with [`CallFailure::Timeout`].
    pub fn expire(&self, unique_id: &str) -> Option<Settled> {
        self.reject(unique_id, CallFailure::Timeout)
    }

    pub fn is_free(&self) -> bool {
        self.lock().is_none()
    }

    pub fn outstanding_id(&self) -> Option<String> {
        self.lock().as_ref().map(|call| call.unique_id.clone())
    }
}
