//! Object-safe views of the protocol.
//!
//! [`AsyncIterator`] returns `impl Future`, which keeps the fast path free of
//! allocation but rules out `dyn`. These traits box the futures instead, for
//! the places that need type erasure: heterogeneous partitions, nested
//! sequences of different concrete types, plugin-style sources.

use std::sync::Arc;

use async_trait::async_trait;

use nagare_types::FlowResult;

use super::{AsyncEnumerable, AsyncIterator};

/// Object-safe [`AsyncIterator`].
#[async_trait]
pub trait DynAsyncIterator: Send + Sync {
    type Item: Send;

    async fn dyn_advance(&self) -> FlowResult<bool>;

    fn dyn_fetch(&self) -> Option<Self::Item>;

    async fn dyn_close(&self) -> FlowResult<()>;
}

#[async_trait]
impl<I: AsyncIterator> DynAsyncIterator for I {
    type Item = I::Item;

    async fn dyn_advance(&self) -> FlowResult<bool> {
        self.advance().await
    }

    fn dyn_fetch(&self) -> Option<Self::Item> {
        self.fetch()
    }

    async fn dyn_close(&self) -> FlowResult<()> {
        self.close().await
    }
}

/// A boxed, type-erased iterator.
pub type BoxAsyncIterator<T> = Box<dyn DynAsyncIterator<Item = T>>;

impl<T: Send> AsyncIterator for BoxAsyncIterator<T> {
    type Item = T;

    async fn advance(&self) -> FlowResult<bool> {
        (**self).dyn_advance().await
    }

    fn fetch(&self) -> Option<T> {
        (**self).dyn_fetch()
    }

    async fn close(&self) -> FlowResult<()> {
        (**self).dyn_close().await
    }
}

/// Object-safe [`AsyncEnumerable`].
pub trait DynAsyncEnumerable: Send + Sync {
    type Item: Send;

    fn dyn_iter(&self) -> FlowResult<BoxAsyncIterator<Self::Item>>;
}

impl<E> DynAsyncEnumerable for E
where
    E: AsyncEnumerable,
    E::Iter: 'static,
{
    type Item = E::Item;

    fn dyn_iter(&self) -> FlowResult<BoxAsyncIterator<E::Item>> {
        Ok(Box::new(self.iter()?))
    }
}

/// A shared, type-erased enumerable.
pub struct BoxEnumerable<T> {
    inner: Arc<dyn DynAsyncEnumerable<Item = T>>,
}

impl<T: Send + 'static> BoxEnumerable<T> {
    pub fn new<E>(source: E) -> Self
    where
        E: AsyncEnumerable<Item = T> + 'static,
        E::Iter: 'static,
    {
        Self {
            inner: Arc::new(source),
        }
    }
}

impl<T> Clone for BoxEnumerable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send> AsyncEnumerable for BoxEnumerable<T> {
    type Item = T;
    type Iter = BoxAsyncIterator<T>;

    fn iter(&self) -> FlowResult<BoxAsyncIterator<T>> {
        self.inner.dyn_iter()
    }
}
