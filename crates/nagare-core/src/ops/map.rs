//! Projection steps.

use std::future::Future;

use nagare_types::FlowResult;

use super::step::{AsyncStep, StepOutcome, SyncStep};

#[derive(Debug, Clone)]
pub struct MapStep<F>(pub(crate) F);

impl<T, U, F> SyncStep<T> for MapStep<F>
where
    U: Send,
    F: FnMut(T) -> U + Clone + Send + Sync,
{
    type Output = U;

    fn step(&mut self, item: T) -> FlowResult<StepOutcome<U>> {
        Ok(StepOutcome::Emit((self.0)(item)))
    }
}

#[derive(Debug, Clone)]
pub struct MapAsyncStep<F>(pub(crate) F);

impl<T, U, F, Fut> AsyncStep<T> for MapAsyncStep<F>
where
    T: Send,
    U: Send,
    F: FnMut(T) -> Fut + Clone + Send + Sync,
    Fut: Future<Output = FlowResult<U>> + Send,
{
    type Output = U;

    async fn step(&mut self, item: T) -> FlowResult<StepOutcome<U>> {
        (self.0)(item).await.map(StepOutcome::Emit)
    }
}
