//! Exclusive iterator-as-enumerable.
//!
//! One long-lived producer (a socket reader, a tailing log) that must refuse
//! concurrent consumers but can be re-acquired once the current consumer is
//! done:
//!
//! ```text
//!   Fresh ──iter()──▶ Reserved ──▶ … ──close()──▶ Fresh ──iter()──▶ Reserved …
//!                        │
//!                        └── iter() again while leased → ConcurrentAccess
//! ```
//!
//! Each lease carries the generation it was issued under; closing bumps the
//! generation, so a stale lease reports `AlreadyClosed` instead of driving the
//! next consumer's iteration.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use nagare_types::{FlowError, FlowResult, IterState};

use super::cursor::CursorCore;
use super::{AsyncEnumerable, AsyncIterator, Producer};

struct ExclusiveShared<P: Producer> {
    core: CursorCore<P>,
    generation: AtomicU64,
}

/// An enumerable that hands out at most one live [`Lease`] at a time.
pub struct Exclusive<P: Producer> {
    shared: Arc<ExclusiveShared<P>>,
}

impl<P: Producer> Exclusive<P> {
    pub fn new(producer: P) -> Self {
        Self {
            shared: Arc::new(ExclusiveShared {
                core: CursorCore::new(producer, IterState::Fresh),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// True while a lease is live.
    pub fn is_leased(&self) -> bool {
        self.shared.core.state.load() != IterState::Fresh
    }
}

impl<P: Producer> Clone for Exclusive<P> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<P: Producer> AsyncEnumerable for Exclusive<P> {
    type Item = P::Item;
    type Iter = Lease<P>;

    fn iter(&self) -> FlowResult<Lease<P>> {
        self.shared.core.state.reserve()?;
        Ok(Lease {
            shared: self.shared.clone(),
            generation: self.shared.generation.load(Ordering::Acquire),
        })
    }
}

/// The live iterator of an [`Exclusive`].
pub struct Lease<P: Producer> {
    shared: Arc<ExclusiveShared<P>>,
    generation: u64,
}

impl<P: Producer> Lease<P> {
    fn is_current(&self) -> bool {
        self.shared.generation.load(Ordering::Acquire) == self.generation
    }
}

impl<P: Producer> AsyncIterator for Lease<P> {
    type Item = P::Item;

    async fn advance(&self) -> FlowResult<bool> {
        if !self.is_current() {
            return Err(FlowError::AlreadyClosed);
        }
        self.shared.core.advance().await
    }

    fn fetch(&self) -> Option<P::Item> {
        if !self.is_current() {
            return None;
        }
        self.shared.core.fetch()
    }

    async fn close(&self) -> FlowResult<()> {
        if !self.is_current() {
            return Err(FlowError::AlreadyClosed);
        }
        let shared = &self.shared;
        shared
            .core
            .close_with(|| {
                // Retire this lease before the register becomes leasable again
                shared.generation.fetch_add(1, Ordering::AcqRel);
                shared.core.state.reset();
            })
            .await
    }
}

impl<P: Producer> Drop for Lease<P> {
    fn drop(&mut self) {
        if self.is_current() {
            tracing::debug!(
                state = %self.shared.core.state.load(),
                "exclusive lease dropped without close; enumerable stays reserved"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Hands out an ever-increasing number; each lease reads three.
    struct Ticker {
        next: u32,
        per_lease: u32,
        served: u32,
        closes: Arc<AtomicUsize>,
    }

    impl Producer for Ticker {
        type Item = u32;

        async fn produce(&mut self) -> FlowResult<Option<u32>> {
            if self.served == self.per_lease {
                return Ok(None);
            }
            self.served += 1;
            self.next += 1;
            Ok(Some(self.next))
        }

        async fn close(&mut self) -> FlowResult<()> {
            self.served = 0;
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ticker() -> (Exclusive<Ticker>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = Exclusive::new(Ticker {
            next: 0,
            per_lease: 3,
            served: 0,
            closes: closes.clone(),
        });
        (source, closes)
    }

    async fn read_all(lease: &Lease<Ticker>) -> Vec<u32> {
        let mut out = Vec::new();
        while lease.advance().await.unwrap() {
            out.push(lease.fetch().unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_second_acquisition_faults() {
        let (source, _) = ticker();
        let _lease = source.iter().unwrap();
        assert!(source.is_leased());
        assert!(matches!(
            source.iter(),
            Err(FlowError::ConcurrentAccess { operation: "acquire", .. })
        ));
    }

    #[tokio::test]
    async fn test_close_makes_reusable() {
        let (source, closes) = ticker();

        let lease = source.iter().unwrap();
        assert_eq!(read_all(&lease).await, vec![1, 2, 3]);
        lease.close().await.unwrap();
        assert!(!source.is_leased());

        let lease = source.iter().unwrap();
        assert_eq!(read_all(&lease).await, vec![4, 5, 6]);
        lease.close().await.unwrap();

        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stale_lease_is_closed() {
        let (source, _) = ticker();

        let stale = source.iter().unwrap();
        stale.close().await.unwrap();
        let fresh = source.iter().unwrap();

        assert!(matches!(stale.advance().await, Err(FlowError::AlreadyClosed)));
        assert!(matches!(stale.close().await, Err(FlowError::AlreadyClosed)));
        assert_eq!(stale.fetch(), None);

        // The live lease is unaffected
        assert!(fresh.advance().await.unwrap());
        assert_eq!(fresh.fetch(), Some(1));
    }

    #[tokio::test]
    async fn test_clones_share_the_reservation() {
        let (source, _) = ticker();
        let other = source.clone();
        let lease = source.iter().unwrap();
        assert!(other.iter().is_err());
        lease.close().await.unwrap();
        assert!(other.iter().is_ok());
    }
}
