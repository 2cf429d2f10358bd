//! Type-narrowing filter.

use std::marker::PhantomData;

use nagare_types::FlowResult;

use super::step::{StepOutcome, SyncStep};

/// Keeps the items that convert into `U`.
pub struct OfTypeStep<U>(PhantomData<fn() -> U>);

impl<U> OfTypeStep<U> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

impl<U> Clone for OfTypeStep<U> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<U> std::fmt::Debug for OfTypeStep<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OfTypeStep")
            .field(&std::any::type_name::<U>())
            .finish()
    }
}

impl<T, U> SyncStep<T> for OfTypeStep<U>
where
    U: TryFrom<T> + Send,
{
    type Output = U;

    fn step(&mut self, item: T) -> FlowResult<StepOutcome<U>> {
        Ok(match U::try_from(item) {
            Ok(narrowed) => StepOutcome::Emit(narrowed),
            Err(_) => StepOutcome::Skip,
        })
    }
}
