//! Prefix operators: `take`, `take_while`, `take_while_async`.

use std::future::Future;

use nagare_types::FlowResult;

use crate::iter::{AsyncEnumerable, AsyncIterator, Cursor, Producer};

use super::step::{AsyncStep, StepOutcome, SyncStep};

/// The first `count` items of an upstream enumerable.
#[derive(Debug, Clone)]
pub struct Take<E> {
    upstream: E,
    count: usize,
}

impl<E> Take<E> {
    pub(crate) fn new(upstream: E, count: usize) -> Self {
        Self { upstream, count }
    }
}

impl<E: AsyncEnumerable> AsyncEnumerable for Take<E> {
    type Item = E::Item;
    type Iter = Cursor<TakeProducer<E::Iter>>;

    fn iter(&self) -> FlowResult<Self::Iter> {
        Ok(Cursor::new(TakeProducer {
            upstream: self.upstream.iter()?,
            remaining: self.count,
        }))
    }
}

pub struct TakeProducer<I> {
    upstream: I,
    remaining: usize,
}

impl<I: AsyncIterator> Producer for TakeProducer<I> {
    type Item = I::Item;

    async fn produce(&mut self) -> FlowResult<Option<I::Item>> {
        // Once the quota is spent upstream is never consulted again
        while self.remaining > 0 {
            if !self.upstream.advance().await? {
                self.remaining = 0;
                return Ok(None);
            }
            if let Some(item) = self.upstream.fetch() {
                self.remaining -= 1;
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> FlowResult<()> {
        self.upstream.close().await
    }
}

#[derive(Debug, Clone)]
pub struct TakeWhileStep<F>(pub(crate) F);

impl<T, F> SyncStep<T> for TakeWhileStep<F>
where
    T: Send,
    F: FnMut(&T) -> bool + Clone + Send + Sync,
{
    type Output = T;

    fn step(&mut self, item: T) -> FlowResult<StepOutcome<T>> {
        Ok(if (self.0)(&item) {
            StepOutcome::Emit(item)
        } else {
            StepOutcome::Stop
        })
    }
}

#[derive(Debug, Clone)]
pub struct TakeWhileAsyncStep<F>(pub(crate) F);

impl<T, F, Fut> AsyncStep<T> for TakeWhileAsyncStep<F>
where
    T: Send,
    F: FnMut(&T) -> Fut + Clone + Send + Sync,
    Fut: Future<Output = FlowResult<bool>> + Send,
{
    type Output = T;

    async fn step(&mut self, item: T) -> FlowResult<StepOutcome<T>> {
        let keep = (self.0)(&item).await?;
        Ok(if keep {
            StepOutcome::Emit(item)
        } else {
            StepOutcome::Stop
        })
    }
}
