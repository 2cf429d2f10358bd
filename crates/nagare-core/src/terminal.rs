//! Terminal operators.
//!
//! Each opens one iterator, drives it, and closes it before returning. The
//! close is unwinding-aware: when the drive already failed, a close fault is
//! logged and the original error wins.

use std::future::Future;

use nagare_types::{FlowError, FlowResult};

use crate::iter::{AsyncEnumerable, AsyncIterator, close_after};

async fn next_item<I: AsyncIterator>(iter: &I) -> FlowResult<Option<I::Item>> {
    while iter.advance().await? {
        if let Some(item) = iter.fetch() {
            return Ok(Some(item));
        }
    }
    Ok(None)
}

async fn any_in<I, F>(iter: &I, mut pred: F) -> FlowResult<bool>
where
    I: AsyncIterator,
    F: FnMut(&I::Item) -> bool,
{
    while let Some(item) = next_item(iter).await? {
        if pred(&item) {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn any_async_in<I, F, Fut>(iter: &I, mut pred: F, wanted: bool) -> FlowResult<bool>
where
    I: AsyncIterator,
    F: FnMut(&I::Item) -> Fut,
    Fut: Future<Output = FlowResult<bool>>,
{
    while let Some(item) = next_item(iter).await? {
        if pred(&item).await? == wanted {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn fold_in<I, A, F>(iter: &I, seed: A, mut f: F) -> FlowResult<A>
where
    I: AsyncIterator,
    F: FnMut(A, I::Item) -> A,
{
    let mut acc = seed;
    while let Some(item) = next_item(iter).await? {
        acc = f(acc, item);
    }
    Ok(acc)
}

async fn fold_async_in<I, A, F, Fut>(iter: &I, seed: A, mut f: F) -> FlowResult<A>
where
    I: AsyncIterator,
    F: FnMut(A, I::Item) -> Fut,
    Fut: Future<Output = FlowResult<A>>,
{
    let mut acc = seed;
    while let Some(item) = next_item(iter).await? {
        acc = f(acc, item).await?;
    }
    Ok(acc)
}

async fn aggregate_in<I, F>(iter: &I, f: F) -> FlowResult<I::Item>
where
    I: AsyncIterator,
    F: FnMut(I::Item, I::Item) -> I::Item,
{
    let seed = next_item(iter).await?.ok_or(FlowError::EmptySequence)?;
    fold_in(iter, seed, f).await
}

/// First element; `EmptySequence` when there is none.
pub async fn first<E>(source: &E) -> FlowResult<E::Item>
where
    E: AsyncEnumerable + ?Sized,
{
    let iter = source.iter()?;
    let result = match next_item(&iter).await {
        Ok(item) => item.ok_or(FlowError::EmptySequence),
        Err(err) => Err(err),
    };
    close_after(&iter, result).await
}

/// First element, or `T::default()` when there is none.
pub async fn first_or_default<E>(source: &E) -> FlowResult<E::Item>
where
    E: AsyncEnumerable + ?Sized,
    E::Item: Default,
{
    let iter = source.iter()?;
    let result = next_item(&iter).await.map(Option::unwrap_or_default);
    close_after(&iter, result).await
}

/// True as soon as one element matches.
pub async fn any<E, F>(source: &E, pred: F) -> FlowResult<bool>
where
    E: AsyncEnumerable + ?Sized,
    F: FnMut(&E::Item) -> bool,
{
    let iter = source.iter()?;
    let result = any_in(&iter, pred).await;
    close_after(&iter, result).await
}

/// False as soon as one element fails.
pub async fn all<E, F>(source: &E, mut pred: F) -> FlowResult<bool>
where
    E: AsyncEnumerable + ?Sized,
    F: FnMut(&E::Item) -> bool,
{
    any(source, move |item| !pred(item)).await.map(|found| !found)
}

pub async fn any_async<E, F, Fut>(source: &E, pred: F) -> FlowResult<bool>
where
    E: AsyncEnumerable + ?Sized,
    F: FnMut(&E::Item) -> Fut,
    Fut: Future<Output = FlowResult<bool>>,
{
    let iter = source.iter()?;
    let result = any_async_in(&iter, pred, true).await;
    close_after(&iter, result).await
}

pub async fn all_async<E, F, Fut>(source: &E, pred: F) -> FlowResult<bool>
where
    E: AsyncEnumerable + ?Sized,
    F: FnMut(&E::Item) -> Fut,
    Fut: Future<Output = FlowResult<bool>>,
{
    let iter = source.iter()?;
    let result = any_async_in(&iter, pred, false).await.map(|failed| !failed);
    close_after(&iter, result).await
}

/// Left fold from `seed`. An empty sequence yields the seed.
pub async fn fold<E, A, F>(source: &E, seed: A, f: F) -> FlowResult<A>
where
    E: AsyncEnumerable + ?Sized,
    F: FnMut(A, E::Item) -> A,
{
    let iter = source.iter()?;
    let result = fold_in(&iter, seed, f).await;
    close_after(&iter, result).await
}

pub async fn fold_async<E, A, F, Fut>(source: &E, seed: A, f: F) -> FlowResult<A>
where
    E: AsyncEnumerable + ?Sized,
    F: FnMut(A, E::Item) -> Fut,
    Fut: Future<Output = FlowResult<A>>,
{
    let iter = source.iter()?;
    let result = fold_async_in(&iter, seed, f).await;
    close_after(&iter, result).await
}

/// Seedless fold: the first element is the seed, so an empty sequence faults
/// with `EmptySequence` and a single element is returned untouched.
pub async fn aggregate<E, F>(source: &E, f: F) -> FlowResult<E::Item>
where
    E: AsyncEnumerable + ?Sized,
    F: FnMut(E::Item, E::Item) -> E::Item,
{
    let iter = source.iter()?;
    let result = aggregate_in(&iter, f).await;
    close_after(&iter, result).await
}

pub async fn count<E>(source: &E) -> FlowResult<u64>
where
    E: AsyncEnumerable + ?Sized,
{
    fold(source, 0u64, |n, _| n + 1).await
}

pub async fn for_each<E, F>(source: &E, mut f: F) -> FlowResult<()>
where
    E: AsyncEnumerable + ?Sized,
    F: FnMut(E::Item),
{
    fold(source, (), |(), item| f(item)).await
}
