//! Timeout supervisor
//!
//! Schedules one expiry per pending call on tokio's timer wheel. The
//! returned [`AbortHandle`] is stored with the call; settling the call
//! aborts the timer, and a timer that fires late finds the slot empty.
//!
//! The runtime is captured when the supervisor is built, so calls may be
//! sent from threads that are not tokio workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("No tokio runtime available to arm the call timer")]
pub struct NoRuntime;

/// Shared across sessions; clones observe the same armed-timer count.
#[derive(Clone)]
pub struct TimeoutSupervisor {
    armed: Arc<AtomicUsize>,
    runtime: Option<Handle>,
}

impl Default for TimeoutSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the armed count when the timer task ends or is aborted.
struct Armed(Arc<AtomicUsize>);

impl Drop for Armed {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TimeoutSupervisor {
    /// Bound to the current runtime, if there is one.
    pub fn new() -> Self {
        Self {
            armed: Arc::new(AtomicUsize::new(0)),
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn on_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Captured runtime, else the caller's.
    pub fn runtime(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }

    /// Run `on_expire` at `deadline` unless aborted first.
    pub fn schedule<F>(&self, deadline: Instant, on_expire: F) -> Result<AbortHandle, NoRuntime>
    where
        F: FnOnce() + Send + 'static,
    {
        let runtime = self.runtime().ok_or(NoRuntime)?;
        self.armed.fetch_add(1, Ordering::SeqCst);
        let armed = Armed(self.armed.clone());
        let task = runtime.spawn(async move {
            let _armed = armed;
            sleep_until(deadline).await;
            on_expire();
        });
        Ok(task.abort_handle())
    }

    /// Timers scheduled and not yet fired or cancelled.
    pub fn armed(&self) -> usize {
        self.armed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn fires_at_deadline() {
        let supervisor = TimeoutSupervisor::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        supervisor
            .schedule(Instant::now() + Duration::from_secs(5), move || {
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(supervisor.armed(), 1);

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(supervisor.armed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_timer_never_fires() {
        let supervisor = TimeoutSupervisor::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let handle = supervisor
            .schedule(Instant::now() + Duration::from_secs(1), move || {
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();
        handle.abort();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(supervisor.armed(), 0);
    }

    #[test]
    fn scheduling_without_runtime_fails() {
        let supervisor = TimeoutSupervisor::new();
        let result = supervisor.schedule(Instant::now(), || {});
        assert_eq!(result.unwrap_err(), NoRuntime);
        assert_eq!(supervisor.armed(), 0);
    }

    #[test]
    fn captured_runtime_serves_other_threads() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let supervisor = TimeoutSupervisor::new().on_runtime(runtime.handle().clone());
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let worker = supervisor.clone();
        std::thread::spawn(move || {
            worker
                .schedule(Instant::now() + Duration::from_millis(10), move || {
                    flag.store(true, Ordering::SeqCst);
                })
                .unwrap();
        })
        .join()
        .unwrap();

        runtime.block_on(async { tokio::time::sleep(Duration::from_millis(100)).await });
        assert!(fired.load(Ordering::SeqCst));
    }
}
