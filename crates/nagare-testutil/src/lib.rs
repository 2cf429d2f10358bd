//! Shared fixtures for nagare tests.
//!
//! - [`Probe`]: counts how often a source is advanced and closed
//! - [`probed_range`], [`yielding_range`], [`failing_at`]: canned sources
//! - [`drain`]: collect a whole sequence

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use nagare_core::{AsyncEnumerable, AsyncEnumerableExt, from_producer, producer_fn};
use nagare_types::{FlowError, FlowResult};

/// Advance and close counters shared with a probed source.
#[derive(Debug, Default)]
pub struct Probe {
    advances: AtomicUsize,
    closes: AtomicUsize,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Producer advances observed so far, across every iterator.
    pub fn advances(&self) -> usize {
        self.advances.load(Ordering::SeqCst)
    }

    /// Producer closes observed so far, across every iterator.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// `range`, synchronously, recording every advance and close in `probe`.
pub fn probed_range(range: Range<u64>, probe: Arc<Probe>) -> impl AsyncEnumerable<Item = u64> {
    from_producer(move || {
        let mut items = range.clone();
        let advanced = probe.clone();
        let closed = probe.clone();
        producer_fn(move || {
            advanced.advances.fetch_add(1, Ordering::SeqCst);
            let item = items.next();
            async move { Ok(item) }
        })
        .on_close(move || async move {
            closed.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    })
}

/// `range`, suspending once before every value.
pub fn yielding_range(range: Range<u64>) -> impl AsyncEnumerable<Item = u64> {
    from_producer(move || {
        let mut items = range.clone();
        producer_fn(move || {
            let item = items.next();
            async move {
                tokio::task::yield_now().await;
                Ok(item)
            }
        })
    })
}

/// `0..len`, except that producing the value `fail_at` faults instead.
pub fn failing_at(len: u64, fail_at: u64) -> impl AsyncEnumerable<Item = u64> {
    from_producer(move || {
        let mut items = 0..len;
        producer_fn(move || {
            let result = match items.next() {
                Some(n) if n == fail_at => {
                    Err(FlowError::callback(format!("source failed at {n}")))
                }
                other => Ok(other),
            };
            async move { result }
        })
    })
}

/// Collect every item, closing the iterator afterwards.
pub async fn drain<E>(source: &E) -> FlowResult<Vec<E::Item>>
where
    E: AsyncEnumerable,
{
    source
        .fold(Vec::new(), |mut out, item| {
            out.push(item);
            out
        })
        .await
}
