//! Batch-buffering adapter for asynchronous steps.
//!
//! ```text
//!   advance ──▶ buffer empty? ──▶ await upstream.advance()   (the one suspension)
//!                                   │
//!                                   ▼
//!               step(item).await ──▶ buffer
//!                                   │
//!               poll upstream.advance() once ◀──┐
//!                 Ready(true)  → step, buffer ──┘   (until batch limit)
//!                 Ready(false) → upstream ended
//!                 Pending      → park as look-ahead for the next call
//! ```
//!
//! Values come out in upstream order. A pending upstream advance is parked
//! and awaited by the next `advance`. `close` never waits on it: the parked
//! advance is dropped, which leaves upstream `Ended`, and upstream is closed
//! straight away.

use std::collections::VecDeque;
use std::sync::Arc;
use std::task::Poll;

use futures::FutureExt;
use futures::future::BoxFuture;

use nagare_types::{FlowError, FlowResult};

use crate::config::NagareConfig;
use crate::iter::{AsyncEnumerable, AsyncIterator, Cursor, Producer};

use super::step::{AsyncStep, StepOutcome};

/// Values buffered per upstream suspension unless configured otherwise.
pub const DEFAULT_BATCH_LIMIT: usize = 64;

/// Tuning for batch-buffering operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum values buffered by one `advance` (minimum 1).
    pub limit: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_BATCH_LIMIT,
        }
    }
}

impl BatchOptions {
    pub fn from_config(config: &NagareConfig) -> Self {
        Self {
            limit: config.batch_limit,
        }
    }
}

/// Upstream enumerable with an asynchronous step applied.
#[derive(Debug, Clone)]
pub struct Batched<E, S> {
    upstream: E,
    step: S,
    options: BatchOptions,
}

impl<E, S> Batched<E, S> {
    pub(crate) fn new(upstream: E, step: S) -> Self {
        Self {
            upstream,
            step,
            options: BatchOptions::default(),
        }
    }

    /// Cap the values buffered per upstream suspension.
    pub fn batch_limit(mut self, limit: usize) -> Self {
        self.options.limit = limit;
        self
    }

    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }
}

impl<E, S> AsyncEnumerable for Batched<E, S>
where
    E: AsyncEnumerable,
    E::Iter: 'static,
    S: AsyncStep<E::Item>,
{
    type Item = S::Output;
    type Iter = Cursor<BatchProducer<E::Iter, S>>;

    fn iter(&self) -> FlowResult<Self::Iter> {
        Ok(Cursor::new(BatchProducer {
            upstream: Arc::new(self.upstream.iter()?),
            step: self.step.clone(),
            buffer: VecDeque::new(),
            lookahead: None,
            deferred: None,
            limit: self.options.limit.max(1),
            stopped: false,
        }))
    }
}

pub struct BatchProducer<I: AsyncIterator, S: AsyncStep<I::Item>> {
    upstream: Arc<I>,
    step: S,
    buffer: VecDeque<S::Output>,
    lookahead: Option<BoxFuture<'static, FlowResult<bool>>>,
    deferred: Option<FlowError>,
    limit: usize,
    stopped: bool,
}

impl<I, S> BatchProducer<I, S>
where
    I: AsyncIterator + 'static,
    S: AsyncStep<I::Item>,
{
    fn advance_upstream(&self) -> BoxFuture<'static, FlowResult<bool>> {
        let upstream = self.upstream.clone();
        async move { upstream.advance().await }.boxed()
    }

    /// Fetch the ready upstream value and run the step over it.
    async fn take_ready(&mut self) -> FlowResult<()> {
        let Some(item) = self.upstream.fetch() else {
            return Ok(());
        };
        match self.step.step(item).await? {
            StepOutcome::Emit(out) => self.buffer.push_back(out),
            StepOutcome::Skip => {}
            StepOutcome::Stop => self.stopped = true,
        }
        Ok(())
    }

    /// Keep pulling while upstream values are available without suspending.
    async fn fill(&mut self) -> FlowResult<()> {
        while !self.stopped && self.buffer.len() < self.limit {
            let mut next = self.advance_upstream();
            match futures::poll!(&mut next) {
                Poll::Ready(Ok(true)) => self.take_ready().await?,
                Poll::Ready(Ok(false)) => self.stopped = true,
                Poll::Ready(Err(err)) => return Err(err),
                Poll::Pending => {
                    self.lookahead = Some(next);
                    break;
                }
            }
        }
        Ok(())
    }
}

impl<I, S> Producer for BatchProducer<I, S>
where
    I: AsyncIterator + 'static,
    S: AsyncStep<I::Item>,
{
    type Item = S::Output;

    async fn produce(&mut self) -> FlowResult<Option<S::Output>> {
        loop {
            if let Some(out) = self.buffer.pop_front() {
                return Ok(Some(out));
            }
            if let Some(err) = self.deferred.take() {
                return Err(err);
            }
            if self.stopped {
                return Ok(None);
            }

            let has_item = match self.lookahead.take() {
                Some(parked) => parked.await?,
                None => self.upstream.advance().await?,
            };
            if !has_item {
                self.stopped = true;
                return Ok(None);
            }
            self.take_ready().await?;

            // Values already buffered go out before a fault raised while filling
            if let Err(err) = self.fill().await {
                self.stopped = true;
                if self.buffer.is_empty() {
                    return Err(err);
                }
                self.deferred = Some(err);
            }
        }
    }

    async fn close(&mut self) -> FlowResult<()> {
        self.buffer.clear();
        if let Some(parked) = self.lookahead.take() {
            // Dropping the in-flight advance leaves upstream Ended, so it closes now
            drop(parked);
            tracing::debug!("pending look-ahead abandoned on close");
        }
        self.upstream.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::ops::AsyncEnumerableExt;
    use crate::source::{from_fn, from_iter, from_producer, producer_fn};

    /// `1..=len`, suspending once before every even value.
    fn yielding(len: u32) -> impl AsyncEnumerable<Item = u32> {
        from_fn(move || {
            let mut n = 0;
            move || {
                n += 1;
                let item = (n <= len).then_some(n);
                let pause = n % 2 == 0;
                async move {
                    if pause {
                        tokio::task::yield_now().await;
                    }
                    Ok(item)
                }
            }
        })
    }

    async fn collect<E: AsyncEnumerable>(source: &E) -> FlowResult<Vec<E::Item>> {
        source
            .fold(Vec::new(), |mut out, item| {
                out.push(item);
                out
            })
            .await
    }

    #[tokio::test]
    async fn test_order_survives_suspensions() {
        let doubled = yielding(9).map_async(|x| async move { Ok(x * 2) });
        assert_eq!(
            collect(&doubled).await.unwrap(),
            vec![2, 4, 6, 8, 10, 12, 14, 16, 18]
        );

        let odd = yielding(9).filter_async(|x| {
            let keep = x % 2 == 1;
            async move { Ok(keep) }
        });
        assert_eq!(collect(&odd).await.unwrap(), vec![1, 3, 5, 7, 9]);
    }

    #[tokio::test]
    async fn test_sync_upstream_fills_one_batch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let source = from_iter(0..5).map_async(move |x| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(x) }
        });

        let iter = source.iter().unwrap();
        assert!(iter.advance().await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(iter.fetch(), Some(0));
        iter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_batch_limit_caps_buffering() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let source = from_iter(0..5)
            .map_async(move |x| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(x) }
            })
            .batch_limit(2);

        let iter = source.iter().unwrap();
        assert!(iter.advance().await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        iter.fetch();
        iter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_abandons_parked_lookahead() {
        let closes = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let source = {
            let closes = closes.clone();
            from_producer(move || {
                let closes = closes.clone();
                let mut n = 0u32;
                producer_fn(move || {
                    n += 1;
                    let item = (n <= 3).then_some(n);
                    async move {
                        if item == Some(2) {
                            tokio::task::yield_now().await;
                        }
                        Ok(item)
                    }
                })
                .on_close(move || async move {
                    closes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        };
        let log = seen.clone();
        let mapped = source.map_async(move |x| {
            log.lock().unwrap().push(x);
            async move { Ok(x) }
        });

        let iter = mapped.iter().unwrap();
        assert!(iter.advance().await.unwrap());
        assert_eq!(iter.fetch(), Some(1));
        // Value 2 is still pending upstream, so only 1 went through the step
        assert_eq!(*seen.lock().unwrap(), vec![1]);

        iter.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_does_not_wait_for_unrequested_items() {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = {
            let closes = closes.clone();
            from_producer(move || {
                let closes = closes.clone();
                let mut n = 0u32;
                producer_fn(move || {
                    n += 1;
                    let first = n == 1;
                    async move {
                        if !first {
                            // The second value never arrives
                            std::future::pending::<()>().await;
                        }
                        Ok(Some(n))
                    }
                })
                .on_close(move || async move {
                    closes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        };
        let mapped = source.map_async(|x| async move { Ok(x * 10) });

        let first = tokio::time::timeout(Duration::from_secs(60), mapped.first())
            .await
            .expect("first() must not wait for the second upstream value");
        assert_eq!(first.unwrap(), 10);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // Early exit through take() closes the same way
        let taken = (&mapped).take(1);
        let items = tokio::time::timeout(Duration::from_secs(60), collect(&taken))
            .await
            .expect("take(1) must not wait for the second upstream value");
        assert_eq!(items.unwrap(), vec![10]);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fault_while_filling_is_deferred() {
        let source = from_fn(|| {
            let mut n = 0;
            move || {
                n += 1;
                let result = if n <= 2 {
                    Ok(Some(n))
                } else {
                    Err(FlowError::callback("upstream broke"))
                };
                async move { result }
            }
        })
        .map_async(|x| async move { Ok(x) });

        let iter = source.iter().unwrap();
        assert!(iter.advance().await.unwrap());
        assert_eq!(iter.fetch(), Some(1));
        assert!(iter.advance().await.unwrap());
        assert_eq!(iter.fetch(), Some(2));
        let err = iter.advance().await.unwrap_err();
        assert_eq!(err.to_string(), "upstream broke");
        assert!(!iter.advance().await.unwrap());
        iter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_take_while_async_stops_at_first_failure() {
        let source = yielding(8).take_while_async(|x| {
            let keep = *x < 4;
            async move { Ok(keep) }
        });
        assert_eq!(collect(&source).await.unwrap(), vec![1, 2, 3]);

        let rest = yielding(6).skip_while_async(|x| {
            let skip = *x < 4;
            async move { Ok(skip) }
        });
        assert_eq!(collect(&rest).await.unwrap(), vec![4, 5, 6]);
    }
}
