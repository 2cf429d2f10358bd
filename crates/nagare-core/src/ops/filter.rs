//! Filtering steps.

use std::future::Future;

use nagare_types::FlowResult;

use super::step::{AsyncStep, StepOutcome, SyncStep};

#[derive(Debug, Clone)]
pub struct FilterStep<F>(pub(crate) F);

impl<T, F> SyncStep<T> for FilterStep<F>
where
    T: Send,
    F: FnMut(&T) -> bool + Clone + Send + Sync,
{
    type Output = T;

    fn step(&mut self, item: T) -> FlowResult<StepOutcome<T>> {
        Ok(if (self.0)(&item) {
            StepOutcome::Emit(item)
        } else {
            StepOutcome::Skip
        })
    }
}

#[derive(Debug, Clone)]
pub struct FilterAsyncStep<F>(pub(crate) F);

impl<T, F, Fut> AsyncStep<T> for FilterAsyncStep<F>
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
            StepOutcome::Skip
        })
    }
}
