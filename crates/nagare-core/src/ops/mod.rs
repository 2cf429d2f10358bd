//! Operator pipeline.
//!
//! Every operator wraps its upstream enumerable in a new lazy enumerable;
//! nothing runs until an iterator is advanced. Operator iterators are
//! [`Cursor`](crate::Cursor)s, so each stage enforces the full protocol.
//!
//! Synchronous callbacks are infallible. Asynchronous callbacks return
//! `FlowResult`, and their operators buffer a batch of results per upstream
//! suspension (see [`Batched`]).

mod batch;
mod cancel;
mod filter;
mod flatten;
mod map;
mod of_type;
mod skip;
mod step;
mod take;

use std::future::Future;

use tokio_util::sync::CancellationToken;

use nagare_types::FlowResult;

use crate::iter::{AsyncEnumerable, BoxEnumerable};
use crate::terminal;

pub use batch::{BatchOptions, BatchProducer, Batched, DEFAULT_BATCH_LIMIT};
pub use cancel::{CancelProducer, Cancellable};
pub use filter::{FilterAsyncStep, FilterStep};
pub use flatten::{
    FlatMapIter, FlatMapIterProducer, FlattenProducer, Flattened, Identity, NestedSelector,
    SelectAsync, SelectWith,
};
pub use map::{MapAsyncStep, MapStep};
pub use of_type::OfTypeStep;
pub use skip::{SkipStep, SkipWhileAsyncStep, SkipWhileStep};
pub use step::{AsyncStep, StepOutcome, StepProducer, Stepped, SyncStep};
pub use take::{Take, TakeProducer, TakeWhileAsyncStep, TakeWhileStep};

/// Operators and terminal operators for every [`AsyncEnumerable`].
pub trait AsyncEnumerableExt: AsyncEnumerable + Sized {
    /// Keep the items matching `pred`.
    fn filter<F>(self, pred: F) -> Stepped<Self, FilterStep<F>>
    where
        F: FnMut(&Self::Item) -> bool + Clone + Send + Sync,
    {
        Stepped::new(self, FilterStep(pred))
    }

    fn filter_async<F, Fut>(self, pred: F) -> Batched<Self, FilterAsyncStep<F>>
    where
        F: FnMut(&Self::Item) -> Fut + Clone + Send + Sync,
        Fut: Future<Output = FlowResult<bool>> + Send,
    {
        Batched::new(self, FilterAsyncStep(pred))
    }

    fn map<U, F>(self, f: F) -> Stepped<Self, MapStep<F>>
    where
        U: Send,
        F: FnMut(Self::Item) -> U + Clone + Send + Sync,
    {
        Stepped::new(self, MapStep(f))
    }

    fn map_async<U, F, Fut>(self, f: F) -> Batched<Self, MapAsyncStep<F>>
    where
        U: Send,
        F: FnMut(Self::Item) -> Fut + Clone + Send + Sync,
        Fut: Future<Output = FlowResult<U>> + Send,
    {
        Batched::new(self, MapAsyncStep(f))
    }

    /// Expand each item into a synchronous iterator.
    fn flat_map_iter<U, F>(self, f: F) -> FlatMapIter<Self, F>
    where
        F: FnMut(Self::Item) -> U + Clone + Send + Sync,
        U: IntoIterator,
        U::IntoIter: Send,
        U::Item: Send,
    {
        FlatMapIter::new(self, f)
    }

    /// Expand each item into a nested enumerable.
    fn flat_map<N, F>(self, f: F) -> Flattened<Self, SelectWith<F>>
    where
        N: AsyncEnumerable,
        F: FnMut(Self::Item) -> N + Clone + Send + Sync,
    {
        Flattened::new(self, SelectWith(f))
    }

    fn flat_map_async<N, F, Fut>(self, f: F) -> Flattened<Self, SelectAsync<F>>
    where
        N: AsyncEnumerable,
        F: FnMut(Self::Item) -> Fut + Clone + Send + Sync,
        Fut: Future<Output = FlowResult<N>> + Send,
    {
        Flattened::new(self, SelectAsync(f))
    }

    /// Concatenate items that are themselves enumerables.
    fn flatten(self) -> Flattened<Self, Identity>
    where
        Self::Item: AsyncEnumerable,
    {
        Flattened::new(self, Identity)
    }

    /// At most `count` items. `take(0)` never advances upstream.
    fn take(self, count: usize) -> Take<Self> {
        Take::new(self, count)
    }

    /// Items up to, and excluding, the first one failing `pred`.
    fn take_while<F>(self, pred: F) -> Stepped<Self, TakeWhileStep<F>>
    where
        F: FnMut(&Self::Item) -> bool + Clone + Send + Sync,
    {
        Stepped::new(self, TakeWhileStep(pred))
    }

    fn take_while_async<F, Fut>(self, pred: F) -> Batched<Self, TakeWhileAsyncStep<F>>
    where
        F: FnMut(&Self::Item) -> Fut + Clone + Send + Sync,
        Fut: Future<Output = FlowResult<bool>> + Send,
    {
        Batched::new(self, TakeWhileAsyncStep(pred))
    }

    fn skip(self, count: usize) -> Stepped<Self, SkipStep> {
        Stepped::new(self, SkipStep::new(count))
    }

    fn skip_while<F>(self, pred: F) -> Stepped<Self, SkipWhileStep<F>>
    where
        F: FnMut(&Self::Item) -> bool + Clone + Send + Sync,
    {
        Stepped::new(self, SkipWhileStep::new(pred))
    }

    fn skip_while_async<F, Fut>(self, pred: F) -> Batched<Self, SkipWhileAsyncStep<F>>
    where
        F: FnMut(&Self::Item) -> Fut + Clone + Send + Sync,
        Fut: Future<Output = FlowResult<bool>> + Send,
    {
        Batched::new(self, SkipWhileAsyncStep::new(pred))
    }

    /// Keep the items that convert into `U`, converted.
    fn of_type<U>(self) -> Stepped<Self, OfTypeStep<U>>
    where
        U: TryFrom<Self::Item> + Send,
    {
        Stepped::new(self, OfTypeStep::new())
    }

    /// Fault with `Cancelled` at the next advance once `token` fires.
    fn cancellable(self, token: CancellationToken) -> Cancellable<Self> {
        Cancellable::new(self, token)
    }

    fn boxed(self) -> BoxEnumerable<Self::Item>
    where
        Self: 'static,
        Self::Item: 'static,
        Self::Iter: 'static,
    {
        BoxEnumerable::new(self)
    }

    fn first(&self) -> impl Future<Output = FlowResult<Self::Item>> + Send {
        terminal::first(self)
    }

    fn first_or_default(&self) -> impl Future<Output = FlowResult<Self::Item>> + Send
    where
        Self::Item: Default,
    {
        terminal::first_or_default(self)
    }

    fn any<F>(&self, pred: F) -> impl Future<Output = FlowResult<bool>> + Send
    where
        F: FnMut(&Self::Item) -> bool + Send,
    {
        terminal::any(self, pred)
    }

    fn all<F>(&self, pred: F) -> impl Future<Output = FlowResult<bool>> + Send
    where
        F: FnMut(&Self::Item) -> bool + Send,
    {
        terminal::all(self, pred)
    }

    fn any_async<F, Fut>(&self, pred: F) -> impl Future<Output = FlowResult<bool>> + Send
    where
        F: FnMut(&Self::Item) -> Fut + Send,
        Fut: Future<Output = FlowResult<bool>> + Send,
    {
        terminal::any_async(self, pred)
    }

    fn all_async<F, Fut>(&self, pred: F) -> impl Future<Output = FlowResult<bool>> + Send
    where
        F: FnMut(&Self::Item) -> Fut + Send,
        Fut: Future<Output = FlowResult<bool>> + Send,
    {
        terminal::all_async(self, pred)
    }

    fn fold<A, F>(&self, seed: A, f: F) -> impl Future<Output = FlowResult<A>> + Send
    where
        A: Send,
        F: FnMut(A, Self::Item) -> A + Send,
    {
        terminal::fold(self, seed, f)
    }

    fn fold_async<A, F, Fut>(&self, seed: A, f: F) -> impl Future<Output = FlowResult<A>> + Send
    where
        A: Send,
        F: FnMut(A, Self::Item) -> Fut + Send,
        Fut: Future<Output = FlowResult<A>> + Send,
    {
        terminal::fold_async(self, seed, f)
    }

    fn aggregate<F>(&self, f: F) -> impl Future<Output = FlowResult<Self::Item>> + Send
    where
        F: FnMut(Self::Item, Self::Item) -> Self::Item + Send,
    {
        terminal::aggregate(self, f)
    }

    fn count(&self) -> impl Future<Output = FlowResult<u64>> + Send {
        terminal::count(self)
    }

    fn for_each<F>(&self, f: F) -> impl Future<Output = FlowResult<()>> + Send
    where
        F: FnMut(Self::Item) + Send,
    {
        terminal::for_each(self, f)
    }
}

impl<E: AsyncEnumerable> AsyncEnumerableExt for E {}
