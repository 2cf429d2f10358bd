//! Skipping filters. Each iterator owns its own counter or flag.

use std::future::Future;

use nagare_types::FlowResult;

use super::step::{AsyncStep, StepOutcome, SyncStep};

#[derive(Debug, Clone)]
pub struct SkipStep {
    remaining: usize,
}

impl SkipStep {
    pub(crate) fn new(count: usize) -> Self {
        Self { remaining: count }
    }
}

impl<T: Send> SyncStep<T> for SkipStep {
    type Output = T;

    fn step(&mut self, item: T) -> FlowResult<StepOutcome<T>> {
        if self.remaining > 0 {
            self.remaining -= 1;
            return Ok(StepOutcome::Skip);
        }
        Ok(StepOutcome::Emit(item))
    }
}

#[derive(Debug, Clone)]
pub struct SkipWhileStep<F> {
    pred: F,
    skipping: bool,
}

impl<F> SkipWhileStep<F> {
    pub(crate) fn new(pred: F) -> Self {
        Self {
            pred,
            skipping: true,
        }
    }
}

impl<T, F> SyncStep<T> for SkipWhileStep<F>
where
    T: Send,
    F: FnMut(&T) -> bool + Clone + Send + Sync,
{
    type Output = T;

    fn step(&mut self, item: T) -> FlowResult<StepOutcome<T>> {
        if self.skipping && (self.pred)(&item) {
            return Ok(StepOutcome::Skip);
        }
        self.skipping = false;
        Ok(StepOutcome::Emit(item))
    }
}

#[derive(Debug, Clone)]
pub struct SkipWhileAsyncStep<F> {
    pred: F,
    skipping: bool,
}

impl<F> SkipWhileAsyncStep<F> {
    pub(crate) fn new(pred: F) -> Self {
        Self {
            pred,
            skipping: true,
        }
    }
}

impl<T, F, Fut> AsyncStep<T> for SkipWhileAsyncStep<F>
where
    T: Send,
    F: FnMut(&T) -> Fut + Clone + Send + Sync,
    Fut: Future<Output = FlowResult<bool>> + Send,
{
    type Output = T;

    async fn step(&mut self, item: T) -> FlowResult<StepOutcome<T>> {
        if self.skipping && (self.pred)(&item).await? {
            return Ok(StepOutcome::Skip);
        }
        self.skipping = false;
        Ok(StepOutcome::Emit(item))
    }
}
