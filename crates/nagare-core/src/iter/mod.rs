//! The async iterator protocol.
//!
//! ```text
//!   AsyncEnumerable ──iter()──▶ AsyncIterator
//!                                 ├── advance()  may suspend, Ok(false) once at the end
//!                                 ├── fetch()    never suspends, Some only once per advance
//!                                 └── close()    runs cleanup exactly once
//! ```
//!
//! Concrete iterators are [`Cursor`]s: a [`Producer`] (the `&mut self`
//! advance/close pair) behind a [`StateRegister`](nagare_types::StateRegister).
//! Operators are producers layered over upstream iterators, so every stage of
//! a pipeline enforces the same protocol.
//!
//! Dropping an in-flight `advance` future abandons the advance: the iterator
//! moves to `Ended` and can still be closed.

mod cursor;
mod dynamic;
mod exclusive;

use std::future::Future;
use std::sync::Arc;

use nagare_types::FlowResult;

pub use cursor::Cursor;
pub use dynamic::{BoxAsyncIterator, BoxEnumerable, DynAsyncEnumerable, DynAsyncIterator};
pub use exclusive::{Exclusive, Lease};

/// A single-use cursor over an asynchronous sequence.
///
/// All methods take `&self`; misuse (a second `advance` while one is in
/// flight, closing twice) is reported as a protocol fault rather than
/// prevented by the borrow checker, because pipeline code shares iterators.
pub trait AsyncIterator: Send + Sync {
    type Item: Send;

    /// Determine whether another value is available. May suspend.
    fn advance(&self) -> impl Future<Output = FlowResult<bool>> + Send;

    /// Take the value produced by the last successful `advance`.
    ///
    /// Returns `None` outside that window. Never faults.
    fn fetch(&self) -> Option<Self::Item>;

    /// Release resources. Cleanup runs exactly once.
    fn close(&self) -> impl Future<Output = FlowResult<()>> + Send;
}

impl<I: AsyncIterator + ?Sized> AsyncIterator for Arc<I> {
    type Item = I::Item;

    fn advance(&self) -> impl Future<Output = FlowResult<bool>> + Send {
        (**self).advance()
    }

    fn fetch(&self) -> Option<Self::Item> {
        (**self).fetch()
    }

    fn close(&self) -> impl Future<Output = FlowResult<()>> + Send {
        (**self).close()
    }
}

/// A reusable factory of fresh iterators.
pub trait AsyncEnumerable: Send + Sync {
    type Item: Send;
    type Iter: AsyncIterator<Item = Self::Item>;

    /// Start a new iteration.
    ///
    /// Fails only for enumerables that allow a single live iterator.
    fn iter(&self) -> FlowResult<Self::Iter>;
}

impl<E: AsyncEnumerable + ?Sized> AsyncEnumerable for Arc<E> {
    type Item = E::Item;
    type Iter = E::Iter;

    fn iter(&self) -> FlowResult<Self::Iter> {
        (**self).iter()
    }
}

impl<E: AsyncEnumerable + ?Sized> AsyncEnumerable for &E {
    type Item = E::Item;
    type Iter = E::Iter;

    fn iter(&self) -> FlowResult<Self::Iter> {
        (**self).iter()
    }
}

/// The `&mut self` half of an iterator: what a [`Cursor`] drives.
///
/// `produce` is never called concurrently with itself or with `close`; the
/// cursor's state register guarantees it.
pub trait Producer: Send {
    type Item: Send;

    /// Produce the next value, or `None` at the end of the sequence.
    fn produce(&mut self) -> impl Future<Output = FlowResult<Option<Self::Item>>> + Send;

    /// Release resources. Called at most once per lease.
    fn close(&mut self) -> impl Future<Output = FlowResult<()>> + Send {
        async { Ok(()) }
    }
}

/// Convenience methods for driving any iterator.
pub trait AsyncIteratorExt: AsyncIterator {
    /// Advance and fetch in one step.
    fn next(&self) -> impl Future<Output = FlowResult<Option<Self::Item>>> + Send {
        async move {
            while self.advance().await? {
                if let Some(item) = self.fetch() {
                    return Ok(Some(item));
                }
            }
            Ok(None)
        }
    }
}

impl<I: AsyncIterator + ?Sized> AsyncIteratorExt for I {}

/// Close `iter` after an operation finished with `result`.
///
/// An unfetched value is drained first so the close is legal. When `result`
/// is already an error, a close fault is logged and dropped so the earlier
/// error wins; otherwise the close fault propagates.
pub async fn close_after<I, T>(iter: &I, result: FlowResult<T>) -> FlowResult<T>
where
    I: AsyncIterator + ?Sized,
{
    drop(iter.fetch());
    match result {
        Ok(value) => {
            iter.close().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(close_err) = iter.close().await {
                tracing::debug!(error = %close_err, "close fault swallowed while unwinding");
            }
            Err(err)
        }
    }
}
