//! Flattening operators.
//!
//! A nested iterator is exhausted and closed before the upstream is advanced
//! again, and closing the outer iterator closes a live nested one first.

use std::future::Future;

use nagare_types::FlowResult;

use crate::iter::{AsyncEnumerable, AsyncIterator, Cursor, Producer, close_after};

/// Turns an upstream item into a nested enumerable.
pub trait NestedSelector<T>: Clone + Send + Sync {
    type Nested: AsyncEnumerable;

    fn select(&mut self, item: T) -> impl Future<Output = FlowResult<Self::Nested>> + Send;
}

/// Items are enumerables already.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl<T: AsyncEnumerable> NestedSelector<T> for Identity {
    type Nested = T;

    async fn select(&mut self, item: T) -> FlowResult<T> {
        Ok(item)
    }
}

#[derive(Debug, Clone)]
pub struct SelectWith<F>(pub(crate) F);

impl<T, N, F> NestedSelector<T> for SelectWith<F>
where
    T: Send,
    N: AsyncEnumerable,
    F: FnMut(T) -> N + Clone + Send + Sync,
{
    type Nested = N;

    async fn select(&mut self, item: T) -> FlowResult<N> {
        Ok((self.0)(item))
    }
}

#[derive(Debug, Clone)]
pub struct SelectAsync<F>(pub(crate) F);

impl<T, N, F, Fut> NestedSelector<T> for SelectAsync<F>
where
    T: Send,
    N: AsyncEnumerable,
    F: FnMut(T) -> Fut + Clone + Send + Sync,
    Fut: Future<Output = FlowResult<N>> + Send,
{
    type Nested = N;

    async fn select(&mut self, item: T) -> FlowResult<N> {
        (self.0)(item).await
    }
}

/// Upstream items expanded into nested async sequences.
#[derive(Debug, Clone)]
pub struct Flattened<E, S> {
    upstream: E,
    selector: S,
}

impl<E, S> Flattened<E, S> {
    pub(crate) fn new(upstream: E, selector: S) -> Self {
        Self { upstream, selector }
    }
}

type NestedIter<S, T> = <<S as NestedSelector<T>>::Nested as AsyncEnumerable>::Iter;
type NestedItem<S, T> = <<S as NestedSelector<T>>::Nested as AsyncEnumerable>::Item;

impl<E, S> AsyncEnumerable for Flattened<E, S>
where
    E: AsyncEnumerable,
    S: NestedSelector<E::Item>,
{
    type Item = NestedItem<S, E::Item>;
    type Iter = Cursor<FlattenProducer<E::Iter, S>>;

    fn iter(&self) -> FlowResult<Self::Iter> {
        Ok(Cursor::new(FlattenProducer {
            upstream: self.upstream.iter()?,
            selector: self.selector.clone(),
            nested: None,
        }))
    }
}

pub struct FlattenProducer<I: AsyncIterator, S: NestedSelector<I::Item>> {
    upstream: I,
    selector: S,
    nested: Option<NestedIter<S, I::Item>>,
}

impl<I, S> Producer for FlattenProducer<I, S>
where
    I: AsyncIterator,
    S: NestedSelector<I::Item>,
{
    type Item = NestedItem<S, I::Item>;

    async fn produce(&mut self) -> FlowResult<Option<Self::Item>> {
        loop {
            if let Some(inner) = self.nested.as_ref() {
                let finished = match inner.advance().await {
                    Ok(true) => match inner.fetch() {
                        Some(item) => return Ok(Some(item)),
                        None => continue,
                    },
                    Ok(false) => Ok(()),
                    Err(err) => Err(err),
                };
                if let Some(inner) = self.nested.take() {
                    close_after(&inner, finished).await?;
                }
            }

            if !self.upstream.advance().await? {
                return Ok(None);
            }
            let Some(item) = self.upstream.fetch() else {
                continue;
            };
            let nested = self.selector.select(item).await?;
            self.nested = Some(nested.iter()?);
        }
    }

    async fn close(&mut self) -> FlowResult<()> {
        let nested = match self.nested.take() {
            Some(inner) => close_after(&inner, Ok(())).await,
            None => Ok(()),
        };
        let upstream = self.upstream.close().await;
        nested.and(upstream)
    }
}

/// Upstream items expanded into synchronous iterators.
#[derive(Debug, Clone)]
pub struct FlatMapIter<E, F> {
    upstream: E,
    f: F,
}

impl<E, F> FlatMapIter<E, F> {
    pub(crate) fn new(upstream: E, f: F) -> Self {
        Self { upstream, f }
    }
}

impl<E, F, U> AsyncEnumerable for FlatMapIter<E, F>
where
    E: AsyncEnumerable,
    F: FnMut(E::Item) -> U + Clone + Send + Sync,
    U: IntoIterator,
    U::IntoIter: Send,
    U::Item: Send,
{
    type Item = U::Item;
    type Iter = Cursor<FlatMapIterProducer<E::Iter, F, U::IntoIter>>;

    fn iter(&self) -> FlowResult<Self::Iter> {
        Ok(Cursor::new(FlatMapIterProducer {
            upstream: self.upstream.iter()?,
            f: self.f.clone(),
            current: None,
        }))
    }
}

pub struct FlatMapIterProducer<I, F, J> {
    upstream: I,
    f: F,
    current: Option<J>,
}

impl<I, F, U, J> Producer for FlatMapIterProducer<I, F, J>
where
    I: AsyncIterator,
    F: FnMut(I::Item) -> U + Send,
    U: IntoIterator<IntoIter = J>,
    J: Iterator<Item = U::Item> + Send,
    U::Item: Send,
{
    type Item = U::Item;

    async fn produce(&mut self) -> FlowResult<Option<U::Item>> {
        loop {
            if let Some(item) = self.current.as_mut().and_then(Iterator::next) {
                return Ok(Some(item));
            }
            self.current = None;
            if !self.upstream.advance().await? {
                return Ok(None);
            }
            if let Some(item) = self.upstream.fetch() {
                self.current = Some((self.f)(item).into_iter());
            }
        }
    }

    async fn close(&mut self) -> FlowResult<()> {
        self.current = None;
        self.upstream.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use nagare_types::FlowError;

    use crate::ops::AsyncEnumerableExt;
    use crate::source::{from_iter, from_producer, producer_fn};

    /// `0..len`, counting closes.
    fn counted(len: u32, closes: Arc<AtomicUsize>) -> impl AsyncEnumerable<Item = u32> {
        from_producer(move || {
            let mut items = 0..len;
            let closes = closes.clone();
            producer_fn(move || {
                let item = items.next();
                async move { Ok(item) }
            })
            .on_close(move || async move {
                closes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    async fn collect<E: AsyncEnumerable>(source: &E) -> Vec<E::Item> {
        source
            .fold(Vec::new(), |mut out, item| {
                out.push(item);
                out
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_nested_iterators_are_closed() {
        let closes = Arc::new(AtomicUsize::new(0));
        let nested = closes.clone();
        let source = from_iter(vec![1, 0, 2]).flat_map(move |n| counted(n, nested.clone()));

        assert_eq!(collect(&source).await, vec![0, 0, 1]);
        assert_eq!(closes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_outer_close_closes_live_nested() {
        let closes = Arc::new(AtomicUsize::new(0));
        let nested = closes.clone();
        let source = from_iter(vec![1, 3]).flat_map(move |n| counted(n, nested.clone()));

        let iter = source.iter().unwrap();
        assert!(iter.advance().await.unwrap());
        assert_eq!(iter.fetch(), Some(0));
        assert!(iter.advance().await.unwrap());
        assert_eq!(iter.fetch(), Some(0));
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        iter.close().await.unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_flatten_variants() {
        let nested = from_iter(vec![
            from_iter(vec![1, 2]),
            from_iter(vec![]),
            from_iter(vec![3]),
        ]);
        assert_eq!(collect(&nested.flatten()).await, vec![1, 2, 3]);

        let expanded =
            from_iter(vec![2, 3]).flat_map_async(|n| async move { Ok(from_iter(0..n)) });
        assert_eq!(collect(&expanded).await, vec![0, 1, 0, 1, 2]);

        let spread = from_iter(vec![1usize, 2]).flat_map_iter(|n| vec![n; n]);
        assert_eq!(collect(&spread).await, vec![1, 2, 2]);
    }

    #[tokio::test]
    async fn test_selector_fault_propagates() {
        let source = from_iter(vec![1, 2]).flat_map_async(|n| async move {
            if n == 2 {
                return Err(FlowError::callback("bad selector"));
            }
            Ok(from_iter(vec![n]))
        });
        let err = source.count().await.unwrap_err();
        assert_eq!(err.to_string(), "bad selector");
    }
}
