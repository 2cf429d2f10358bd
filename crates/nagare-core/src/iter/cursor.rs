//! Cursor: the state-machine iterator every source and operator hands out.
//!
//! ```text
//!   advance ──▶ [StateRegister CAS] ──▶ producer.produce() ──▶ slot ──▶ fetch
//! ```
//!
//! The state register is the only synchronisation on the hot path. The value
//! slot is a `std::sync::Mutex` (critical sections are a single `Option`
//! swap) and the producer sits behind a `tokio::sync::Mutex` that is only ever
//! taken with `try_lock`: the register already guarantees exclusive access, so
//! the lock can never be contended and never waits.

use std::sync::{Mutex, MutexGuard};

use nagare_types::{AdvanceGate, FlowError, FlowResult, IterState, StateRegister};

use super::{AsyncIterator, Producer};

/// Shared machinery for [`Cursor`] and exclusive leases.
pub(crate) struct CursorCore<P: Producer> {
    pub(crate) state: StateRegister,
    slot: Mutex<Option<P::Item>>,
    producer: tokio::sync::Mutex<P>,
}

/// Moves an abandoned advance to `Ended` if the future is dropped mid-flight.
struct AdvanceGuard<'a> {
    state: &'a StateRegister,
    armed: bool,
}

impl Drop for AdvanceGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.abandon_advance();
        }
    }
}

/// Finishes a close even if the close future is dropped mid-flight.
struct CloseGuard<F: FnOnce()> {
    finish: Option<F>,
}

impl<F: FnOnce()> Drop for CloseGuard<F> {
    fn drop(&mut self) {
        if let Some(finish) = self.finish.take() {
            finish();
        }
    }
}

impl<P: Producer> CursorCore<P> {
    pub(crate) fn new(producer: P, initial: IterState) -> Self {
        Self {
            state: StateRegister::with_state(initial),
            slot: Mutex::new(None),
            producer: tokio::sync::Mutex::new(producer),
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<P::Item>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) async fn advance(&self) -> FlowResult<bool> {
        if self.state.begin_advance()? == AdvanceGate::Exhausted {
            return Ok(false);
        }

        // Advancing from ItemReady discards the unfetched value
        drop(self.lock_slot().take());

        let mut guard = AdvanceGuard {
            state: &self.state,
            armed: true,
        };

        let result = {
            let Ok(mut producer) = self.producer.try_lock() else {
                return Err(FlowError::ConcurrentAccess {
                    operation: "advance",
                    state: IterState::Advancing,
                });
            };
            producer.produce().await
        };
        guard.armed = false;

        match result {
            Ok(Some(item)) => {
                // Publish the value before the state so fetch always sees it
                *self.lock_slot() = Some(item);
                if self.state.finish_advance(true) {
                    Ok(true)
                } else {
                    drop(self.lock_slot().take());
                    Ok(false)
                }
            }
            Ok(None) => {
                self.state.finish_advance(false);
                Ok(false)
            }
            Err(err) => {
                self.state.abandon_advance();
                Err(err)
            }
        }
    }

    pub(crate) fn fetch(&self) -> Option<P::Item> {
        if self.state.try_consume() {
            self.lock_slot().take()
        } else {
            None
        }
    }

    /// Run the producer's cleanup, then hand the register to `finish`.
    pub(crate) async fn close_with<F>(&self, finish: F) -> FlowResult<()>
    where
        F: FnOnce() + Send,
    {
        self.state.begin_close()?;
        drop(self.lock_slot().take());

        let _guard = CloseGuard {
            finish: Some(finish),
        };

        let Ok(mut producer) = self.producer.try_lock() else {
            return Err(FlowError::ConcurrentAccess {
                operation: "close",
                state: IterState::Closing,
            });
        };
        producer.close().await
    }
}

/// Single-use iterator over a [`Producer`].
pub struct Cursor<P: Producer> {
    core: CursorCore<P>,
}

impl<P: Producer> Cursor<P> {
    pub fn new(producer: P) -> Self {
        Self {
            core: CursorCore::new(producer, IterState::Fresh),
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> IterState {
        self.core.state.load()
    }
}

impl<P: Producer> AsyncIterator for Cursor<P> {
    type Item = P::Item;

    async fn advance(&self) -> FlowResult<bool> {
        self.core.advance().await
    }

    fn fetch(&self) -> Option<P::Item> {
        self.core.fetch()
    }

    async fn close(&self) -> FlowResult<()> {
        let state = &self.core.state;
        self.core.close_with(|| state.finish_close()).await
    }
}

impl<P: Producer> Drop for Cursor<P> {
    fn drop(&mut self) {
        let state = self.core.state.load();
        if !matches!(state, IterState::Fresh | IterState::Closed) {
            tracing::debug!(%state, "cursor dropped without close");
        }
    }
}

impl<P: Producer> std::fmt::Debug for Cursor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::FutureExt;

    /// Counts up to `limit`, optionally sleeping before each value.
    struct Counter {
        next: u32,
        limit: u32,
        delay: Option<Duration>,
        closes: Arc<AtomicUsize>,
        fail_close: bool,
    }

    impl Counter {
        fn new(limit: u32) -> (Self, Arc<AtomicUsize>) {
            let closes = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    next: 0,
                    limit,
                    delay: None,
                    closes: closes.clone(),
                    fail_close: false,
                },
                closes,
            )
        }
    }

    impl Producer for Counter {
        type Item = u32;

        async fn produce(&mut self) -> FlowResult<Option<u32>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.next >= self.limit {
                return Ok(None);
            }
            self.next += 1;
            Ok(Some(self.next))
        }

        async fn close(&mut self) -> FlowResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(FlowError::callback("close failed"));
            }
            Ok(())
        }
    }

    struct Failing;

    impl Producer for Failing {
        type Item = u32;

        async fn produce(&mut self) -> FlowResult<Option<u32>> {
            Err(FlowError::callback("producer exploded"))
        }
    }

    #[test]
    fn test_sync_producer_never_suspends() {
        let (producer, _) = Counter::new(3);
        let cursor = Cursor::new(producer);

        for expected in 1..=3 {
            assert!(cursor.advance().now_or_never().unwrap().unwrap());
            assert_eq!(cursor.fetch(), Some(expected));
        }
        assert!(!cursor.advance().now_or_never().unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_fetch_without_advance_is_none() {
        let (producer, _) = Counter::new(3);
        let cursor = Cursor::new(producer);
        assert_eq!(cursor.fetch(), None);
        assert_eq!(cursor.state(), IterState::Fresh);
    }

    #[tokio::test]
    async fn test_fetch_twice_returns_none_second_time() {
        let (producer, _) = Counter::new(3);
        let cursor = Cursor::new(producer);
        assert!(cursor.advance().await.unwrap());
        assert_eq!(cursor.fetch(), Some(1));
        assert_eq!(cursor.fetch(), None);
    }

    #[tokio::test]
    async fn test_advance_without_fetch_discards_value() {
        let (producer, _) = Counter::new(3);
        let cursor = Cursor::new(producer);
        assert!(cursor.advance().await.unwrap());
        assert!(cursor.advance().await.unwrap());
        assert_eq!(cursor.fetch(), Some(2));
    }

    #[tokio::test]
    async fn test_exhaustion_is_idempotent() {
        let (producer, _) = Counter::new(1);
        let cursor = Cursor::new(producer);
        assert!(cursor.advance().await.unwrap());
        cursor.fetch();
        for _ in 0..5 {
            assert!(!cursor.advance().await.unwrap());
        }
        assert_eq!(cursor.state(), IterState::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_advance_faults() {
        let (mut producer, _) = Counter::new(3);
        producer.delay = Some(Duration::from_millis(50));
        let cursor = Cursor::new(producer);

        let (first, second) = tokio::join!(cursor.advance(), cursor.advance());

        assert!(first.unwrap());
        assert!(matches!(
            second,
            Err(FlowError::ConcurrentAccess {
                operation: "advance",
                state: IterState::Advancing
            })
        ));
        assert_eq!(cursor.fetch(), Some(1));
    }

    #[tokio::test]
    async fn test_close_runs_cleanup_once() {
        let (producer, closes) = Counter::new(3);
        let cursor = Cursor::new(producer);

        cursor.close().await.unwrap();
        assert!(matches!(cursor.close().await, Err(FlowError::AlreadyClosed)));
        assert!(matches!(cursor.close().await, Err(FlowError::AlreadyClosed)));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(cursor.state(), IterState::Closed);
    }

    #[tokio::test]
    async fn test_close_with_ready_item_faults() {
        let (producer, closes) = Counter::new(3);
        let cursor = Cursor::new(producer);
        assert!(cursor.advance().await.unwrap());

        assert!(matches!(
            cursor.close().await,
            Err(FlowError::ConcurrentAccess { operation: "close", .. })
        ));
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        cursor.fetch();
        cursor.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_advance_after_close_faults() {
        let (producer, _) = Counter::new(3);
        let cursor = Cursor::new(producer);
        cursor.close().await.unwrap();
        assert!(matches!(cursor.advance().await, Err(FlowError::AlreadyClosed)));
    }

    #[tokio::test]
    async fn test_producer_fault_ends_sequence() {
        let cursor = Cursor::new(Failing);
        let err = cursor.advance().await.unwrap_err();
        assert_eq!(err.to_string(), "producer exploded");
        assert_eq!(cursor.state(), IterState::Ended);
        assert!(!cursor.advance().await.unwrap());
        cursor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_fault_still_closes() {
        let (mut producer, closes) = Counter::new(3);
        producer.fail_close = true;
        let cursor = Cursor::new(producer);

        assert!(cursor.close().await.is_err());
        assert_eq!(cursor.state(), IterState::Closed);
        assert!(matches!(cursor.close().await, Err(FlowError::AlreadyClosed)));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_advance_can_still_close() {
        let (mut producer, closes) = Counter::new(3);
        producer.delay = Some(Duration::from_secs(10));
        let cursor = Cursor::new(producer);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(10), cursor.advance()).await;
        assert!(abandoned.is_err());
        assert_eq!(cursor.state(), IterState::Ended);

        cursor.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
