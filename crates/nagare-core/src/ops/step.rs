//! Per-item steps and the synchronous operator driver.
//!
//! Most operators are a decision per upstream item: emit something, skip it,
//! or stop the whole sequence. [`Stepped`] runs a [`SyncStep`] over an
//! upstream enumerable; [`Batched`](super::Batched) runs an [`AsyncStep`].
//! Each iterator gets its own clone of the step, so counters and flags never
//! leak between iterations.

use std::future::Future;

use nagare_types::FlowResult;

use crate::iter::{AsyncEnumerable, AsyncIterator, Cursor, Producer};

/// What a step decided for one upstream item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<T> {
    /// Yield this value downstream.
    Emit(T),
    /// Drop the item and pull the next one.
    Skip,
    /// End the sequence; upstream is never advanced again.
    Stop,
}

/// A synchronous per-item decision.
pub trait SyncStep<T>: Clone + Send + Sync {
    type Output: Send;

    fn step(&mut self, item: T) -> FlowResult<StepOutcome<Self::Output>>;
}

/// An asynchronous per-item decision.
pub trait AsyncStep<T>: Clone + Send + Sync {
    type Output: Send;

    fn step(
        &mut self,
        item: T,
    ) -> impl Future<Output = FlowResult<StepOutcome<Self::Output>>> + Send;
}

/// Upstream enumerable with a synchronous step applied.
#[derive(Debug, Clone)]
pub struct Stepped<E, S> {
    upstream: E,
    step: S,
}

impl<E, S> Stepped<E, S> {
    pub(crate) fn new(upstream: E, step: S) -> Self {
        Self { upstream, step }
    }
}

impl<E, S> AsyncEnumerable for Stepped<E, S>
where
    E: AsyncEnumerable,
    S: SyncStep<E::Item>,
{
    type Item = S::Output;
    type Iter = Cursor<StepProducer<E::Iter, S>>;

    fn iter(&self) -> FlowResult<Self::Iter> {
        Ok(Cursor::new(StepProducer {
            upstream: self.upstream.iter()?,
            step: self.step.clone(),
            stopped: false,
        }))
    }
}

pub struct StepProducer<I, S> {
    upstream: I,
    step: S,
    stopped: bool,
}

impl<I, S> Producer for StepProducer<I, S>
where
    I: AsyncIterator,
    S: SyncStep<I::Item>,
{
    type Item = S::Output;

    async fn produce(&mut self) -> FlowResult<Option<S::Output>> {
        if self.stopped {
            return Ok(None);
        }
        while self.upstream.advance().await? {
            let Some(item) = self.upstream.fetch() else {
                continue;
            };
            match self.step.step(item)? {
                StepOutcome::Emit(out) => return Ok(Some(out)),
                StepOutcome::Skip => {}
                StepOutcome::Stop => {
                    self.stopped = true;
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> FlowResult<()> {
        self.upstream.close().await
    }
}
