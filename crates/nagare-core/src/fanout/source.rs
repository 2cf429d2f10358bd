//! Concurrent source: a state generator paired with an async fetch.
//!
//! `has_next` hands out states synchronously (page numbers, shard ids, byte
//! ranges); `get_next` turns a state into an item and may suspend. Driven
//! sequentially the pair is an ordinary enumerable. Driven through a
//! [`ConcurrentSession`], every `get_next` runs inside its own fan-out worker,
//! so fetches overlap up to the worker bound.

use std::future::Future;
use std::sync::{Arc, Mutex};

use nagare_types::FlowResult;

use crate::iter::{AsyncEnumerable, Cursor, Producer};

use super::FanOut;

/// See [`concurrent_source`].
pub struct ConcurrentSource<H, G> {
    has_next: Arc<Mutex<H>>,
    get_next: Arc<G>,
}

/// Pair a synchronous state generator with an async item fetch.
///
/// `has_next` is shared by every iterator and fan-out run over the returned
/// source. Once it has returned `None`, a second pass yields nothing; build a
/// fresh source to enumerate again.
pub fn concurrent_source<H, G, S, Fut, T>(has_next: H, get_next: G) -> ConcurrentSource<H, G>
where
    H: FnMut() -> Option<S> + Send,
    G: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = FlowResult<T>> + Send,
    T: Send,
{
    ConcurrentSource {
        has_next: Arc::new(Mutex::new(has_next)),
        get_next: Arc::new(get_next),
    }
}

impl<H, G> Clone for ConcurrentSource<H, G> {
    fn clone(&self) -> Self {
        Self {
            has_next: self.has_next.clone(),
            get_next: self.get_next.clone(),
        }
    }
}

impl<H, G> ConcurrentSource<H, G> {
    /// Fan out over this source with at most `max_workers` fetches in flight.
    pub fn session(&self, max_workers: usize) -> ConcurrentSession<H, G> {
        self.session_with(FanOut::new(max_workers))
    }

    /// Fan out with a configured engine (cancellation, hooks).
    pub fn session_with(&self, fanout: FanOut) -> ConcurrentSession<H, G> {
        ConcurrentSession {
            source: self.clone(),
            fanout,
        }
    }
}

fn next_state<H, S>(has_next: &Mutex<H>) -> Option<S>
where
    H: FnMut() -> Option<S>,
{
    let mut has_next = has_next.lock().unwrap_or_else(|e| e.into_inner());
    (*has_next)()
}

/// Sequential driver: one state, one fetch, per advance.
pub struct SourceProducer<H, G> {
    source: ConcurrentSource<H, G>,
}

impl<H, G, S, Fut, T> Producer for SourceProducer<H, G>
where
    H: FnMut() -> Option<S> + Send,
    G: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = FlowResult<T>> + Send,
    T: Send,
{
    type Item = T;

    async fn produce(&mut self) -> FlowResult<Option<T>> {
        let Some(state) = next_state(&self.source.has_next) else {
            return Ok(None);
        };
        (self.source.get_next)(state).await.map(Some)
    }
}

impl<H, G, S, Fut, T> AsyncEnumerable for ConcurrentSource<H, G>
where
    H: FnMut() -> Option<S> + Send,
    G: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = FlowResult<T>> + Send,
    T: Send,
{
    type Item = T;
    type Iter = Cursor<SourceProducer<H, G>>;

    fn iter(&self) -> FlowResult<Self::Iter> {
        Ok(Cursor::new(SourceProducer {
            source: self.clone(),
        }))
    }
}

/// Yields the raw states, for the fan-out puller.
struct StateProducer<H> {
    has_next: Arc<Mutex<H>>,
}

impl<H, S> Producer for StateProducer<H>
where
    H: FnMut() -> Option<S> + Send,
    S: Send,
{
    type Item = S;

    async fn produce(&mut self) -> FlowResult<Option<S>> {
        Ok(next_state(&self.has_next))
    }
}

/// A [`ConcurrentSource`] bound to a fan-out engine.
pub struct ConcurrentSession<H, G> {
    source: ConcurrentSource<H, G>,
    fanout: FanOut,
}

impl<H, G> ConcurrentSession<H, G> {
    /// Fetch and process every state concurrently; returns the number of
    /// items whose fetch and action both succeeded.
    pub async fn run<S, Fut, T, A, AFut>(&self, action: A) -> FlowResult<u64>
    where
        H: FnMut() -> Option<S> + Send + 'static,
        G: Fn(S) -> Fut + Send + Sync + 'static,
        S: Send + 'static,
        Fut: Future<Output = FlowResult<T>> + Send + 'static,
        T: Send,
        A: Fn(T) -> AFut + Send + Sync + 'static,
        AFut: Future<Output = FlowResult<()>> + Send + 'static,
    {
        let states = Cursor::new(StateProducer {
            has_next: self.source.has_next.clone(),
        });
        let get_next = self.source.get_next.clone();
        let action = Arc::new(action);

        self.fanout
            .run_iter(states, move |state| {
                let get_next = get_next.clone();
                let action = action.clone();
                async move {
                    let item = get_next(state).await?;
                    action(item).await
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::ops::AsyncEnumerableExt;

    fn pages(total: u32) -> impl FnMut() -> Option<u32> + Send {
        let mut next = 0;
        move || {
            next += 1;
            (next <= total).then_some(next)
        }
    }

    #[tokio::test]
    async fn test_sequential_driving() {
        let source = concurrent_source(pages(4), |page| async move { Ok(page * 100) });
        let total = source.fold(0, |acc, x| acc + x).await.unwrap();
        assert_eq!(total, 1000);
    }

    #[tokio::test]
    async fn test_second_pass_sees_exhausted_state() {
        let source = concurrent_source(pages(3), |page| async move { Ok(page) });
        assert_eq!(source.fold(0, |acc, x| acc + x).await.unwrap(), 6);
        assert_eq!(source.fold(0, |acc, x| acc + x).await.unwrap(), 0);

        let count = source.session(2).run(|_| async { Ok(()) }).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_overlaps_fetches() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (current, high) = (in_flight.clone(), peak.clone());
        let source = concurrent_source(pages(12), move |page| {
            let (current, high) = (current.clone(), high.clone());
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                high.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(page)
            }
        });

        let sum = Arc::new(AtomicUsize::new(0));
        let acc = sum.clone();
        let count = source
            .session(4)
            .run(move |page| {
                acc.fetch_add(page as usize, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(count, 12);
        assert_eq!(sum.load(Ordering::SeqCst), 78);
        assert_eq!(peak.load(Ordering::SeqCst), 4);
    }
}
