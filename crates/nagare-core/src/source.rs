//! Source enumerables: where pipelines start.
//!
//! Every source hands out a fresh [`Cursor`] per `iter()` call, except
//! [`exclusive`], which hands out one lease at a time.

use std::future::{Future, Ready};

use nagare_types::FlowResult;

use crate::iter::{AsyncEnumerable, Cursor, Exclusive, Producer};

/// Enumerable over a producer factory. See [`from_producer`].
pub struct FromProducer<F> {
    factory: F,
}

/// Build an enumerable that calls `factory` for every new iterator.
pub fn from_producer<F, P>(factory: F) -> FromProducer<F>
where
    F: Fn() -> P + Send + Sync,
    P: Producer,
{
    FromProducer { factory }
}

impl<F, P> AsyncEnumerable for FromProducer<F>
where
    F: Fn() -> P + Send + Sync,
    P: Producer,
{
    type Item = P::Item;
    type Iter = Cursor<P>;

    fn iter(&self) -> FlowResult<Cursor<P>> {
        Ok(Cursor::new((self.factory)()))
    }
}

/// Close callback used when none was supplied.
pub type NoClose = fn() -> Ready<FlowResult<()>>;

/// A producer assembled from closures. See [`producer_fn`].
pub struct FnProducer<A, C = NoClose> {
    advance: A,
    close: Option<C>,
}

/// Wrap an advance closure as a [`Producer`].
///
/// The closure returns `Ok(Some(item))` for each value and `Ok(None)` at the
/// end. Add cleanup with [`FnProducer::on_close`].
pub fn producer_fn<A, Fut, T>(advance: A) -> FnProducer<A>
where
    A: FnMut() -> Fut + Send,
    Fut: Future<Output = FlowResult<Option<T>>> + Send,
    T: Send,
{
    FnProducer {
        advance,
        close: None,
    }
}

impl<A> FnProducer<A> {
    /// Run `close` once when the iterator is closed.
    pub fn on_close<C, CFut>(self, close: C) -> FnProducer<A, C>
    where
        C: FnOnce() -> CFut + Send,
        CFut: Future<Output = FlowResult<()>> + Send,
    {
        FnProducer {
            advance: self.advance,
            close: Some(close),
        }
    }
}

impl<A, Fut, T, C, CFut> Producer for FnProducer<A, C>
where
    A: FnMut() -> Fut + Send,
    Fut: Future<Output = FlowResult<Option<T>>> + Send,
    T: Send,
    C: FnOnce() -> CFut + Send,
    CFut: Future<Output = FlowResult<()>> + Send,
{
    type Item = T;

    async fn produce(&mut self) -> FlowResult<Option<T>> {
        (self.advance)().await
    }

    async fn close(&mut self) -> FlowResult<()> {
        match self.close.take() {
            Some(close) => close().await,
            None => Ok(()),
        }
    }
}

/// Enumerable over an advance-closure factory. See [`from_fn`].
pub struct FromFn<F> {
    factory: F,
}

/// Build an enumerable from a factory of advance closures.
///
/// `factory` runs once per iterator, so per-iteration state lives in the
/// closure it returns:
///
/// ```ignore
/// let counter = from_fn(|| {
///     let mut n = 0;
///     move || {
///         n += 1;
///         let item = (n <= 3).then_some(n);
///         async move { Ok(item) }
///     }
/// });
/// ```
pub fn from_fn<F, A, Fut, T>(factory: F) -> FromFn<F>
where
    F: Fn() -> A + Send + Sync,
    A: FnMut() -> Fut + Send,
    Fut: Future<Output = FlowResult<Option<T>>> + Send,
    T: Send,
{
    FromFn { factory }
}

impl<F, A, Fut, T> AsyncEnumerable for FromFn<F>
where
    F: Fn() -> A + Send + Sync,
    A: FnMut() -> Fut + Send,
    Fut: Future<Output = FlowResult<Option<T>>> + Send,
    T: Send,
{
    type Item = T;
    type Iter = Cursor<FnProducer<A>>;

    fn iter(&self) -> FlowResult<Self::Iter> {
        Ok(Cursor::new(producer_fn((self.factory)())))
    }
}

/// Producer over a synchronous iterator. Never suspends.
pub struct IterProducer<I> {
    inner: I,
}

impl<I> Producer for IterProducer<I>
where
    I: Iterator + Send,
    I::Item: Send,
{
    type Item = I::Item;

    async fn produce(&mut self) -> FlowResult<Option<I::Item>> {
        Ok(self.inner.next())
    }
}

/// Enumerable over a cloneable collection. See [`from_iter`].
#[derive(Debug, Clone)]
pub struct FromIter<C> {
    items: C,
}

/// Replay `items` for every iterator.
///
/// Every `advance` completes on its first poll, which makes this the source
/// of choice for exercising synchronous fast paths.
pub fn from_iter<C>(items: C) -> FromIter<C>
where
    C: IntoIterator + Clone + Send + Sync,
    C::IntoIter: Send,
    C::Item: Send,
{
    FromIter { items }
}

impl<C> AsyncEnumerable for FromIter<C>
where
    C: IntoIterator + Clone + Send + Sync,
    C::IntoIter: Send,
    C::Item: Send,
{
    type Item = C::Item;
    type Iter = Cursor<IterProducer<C::IntoIter>>;

    fn iter(&self) -> FlowResult<Self::Iter> {
        Ok(Cursor::new(IterProducer {
            inner: self.items.clone().into_iter(),
        }))
    }
}

/// A sequence with no elements.
pub fn empty<T: Send>() -> FromIter<std::iter::Empty<T>> {
    FromIter {
        items: std::iter::empty(),
    }
}

/// A sequence of exactly one element.
pub fn once<T: Clone + Send + Sync>(value: T) -> FromIter<std::iter::Once<T>> {
    FromIter {
        items: std::iter::once(value),
    }
}

/// Share one producer between consumers, one lease at a time.
pub fn exclusive<P: Producer>(producer: P) -> Exclusive<P> {
    Exclusive::new(producer)
}
