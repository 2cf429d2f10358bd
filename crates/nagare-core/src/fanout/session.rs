//! Shared bookkeeping for one fan-out run.
//!
//! ```text
//!   in_flight = 1 (the puller)
//!   worker launched   → +1
//!   worker finished   → -1 ─┐
//!   puller done       → -1 ─┴─▶ reaches 0 → notify
//! ```
//!
//! Whichever decrement reaches zero signals completion. When the puller's own
//! decrement is the last one, nothing is awaited at all.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures::FutureExt;
use tokio::sync::Notify;

use nagare_types::{FanOutOutcome, FlowError, FlowResult};

use super::hooks::FanOutHooks;

pub(crate) struct Session {
    in_flight: AtomicUsize,
    items: AtomicU64,
    spawned: AtomicU64,
    faults: Mutex<Vec<FlowError>>,
    done: Notify,
    hooks: FanOutHooks,
}

impl Session {
    pub(crate) fn new(hooks: FanOutHooks) -> Self {
        Self {
            in_flight: AtomicUsize::new(1),
            items: AtomicU64::new(0),
            spawned: AtomicU64::new(0),
            faults: Mutex::new(Vec::new()),
            done: Notify::new(),
            hooks,
        }
    }

    pub(crate) fn hooks(&self) -> &FanOutHooks {
        &self.hooks
    }

    /// A worker is about to be polled for the first time.
    pub(crate) fn enter(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// A worker finished.
    pub(crate) fn leave(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            // notify_one stores a permit if the puller is not waiting yet
            self.done.notify_one();
        }
    }

    pub(crate) fn spawned(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one finished item.
    pub(crate) fn record(&self, result: FlowResult<()>) {
        match result {
            Ok(()) => {
                self.items.fetch_add(1, Ordering::Relaxed);
                self.hooks.item(Ok(()));
            }
            Err(err) => {
                self.hooks.item(Err(&err));
                self.fault(err);
            }
        }
    }

    /// True once any fault has been recorded.
    pub(crate) fn has_faults(&self) -> bool {
        !self
            .faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    pub(crate) fn fault(&self, err: FlowError) {
        tracing::debug!(error = %err, "fan-out fault recorded");
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(err);
    }

    /// Drop the puller's token and wait for every worker to finish.
    pub(crate) async fn finish_pulling(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) != 1 {
            self.done.notified().await;
        }
    }

    /// Snapshot the run. Only meaningful after `finish_pulling`.
    pub(crate) fn outcome(&self) -> FanOutOutcome {
        let mut guard = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        let faults = std::mem::take(&mut *guard);
        FanOutOutcome {
            items: self.items.load(Ordering::Acquire),
            spawned: self.spawned.load(Ordering::Acquire),
            faults,
        }
    }
}

/// Releases a worker's in-flight token when dropped, so a task that dies
/// mid-poll still counts as finished.
pub(crate) struct LeaveGuard(pub(crate) Arc<Session>);

impl Drop for LeaveGuard {
    fn drop(&mut self) {
        self.0.leave();
    }
}

/// Drive `work` to completion, turning a panic into `WorkerPanicked`.
pub(crate) async fn guarded<Fut>(work: Fut) -> FlowResult<()>
where
    Fut: Future<Output = FlowResult<()>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::warn!(%message, "fan-out worker panicked");
            Err(FlowError::WorkerPanicked(message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_puller_alone_completes_without_waiting() {
        let session = Session::new(FanOutHooks::default());
        session.finish_pulling().now_or_never().unwrap();
        assert!(session.outcome().is_ok());
    }

    #[tokio::test]
    async fn test_last_worker_wakes_puller() {
        let session = Arc::new(Session::new(FanOutHooks::default()));
        session.enter();
        let worker = {
            let session = session.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                session.record(Ok(()));
                session.leave();
            })
        };
        session.finish_pulling().await;
        worker.await.unwrap();
        assert_eq!(session.outcome().items, 1);
    }

    #[tokio::test]
    async fn test_dying_worker_still_releases_its_token() {
        let session = Arc::new(Session::new(FanOutHooks::default()));
        session.enter();
        let guard = LeaveGuard(session.clone());
        let worker = tokio::spawn(async move {
            let _guard = guard;
            tokio::task::yield_now().await;
            panic!("worker died");
        });

        session.finish_pulling().await;
        assert!(worker.await.unwrap_err().is_panic());
    }

    async fn explode() -> FlowResult<()> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_guarded_catches_panics() {
        let result = guarded(explode()).await;
        match result {
            Err(FlowError::WorkerPanicked(message)) => assert_eq!(message, "boom"),
            other => panic!("expected WorkerPanicked, got {other:?}"),
        }
    }
}
