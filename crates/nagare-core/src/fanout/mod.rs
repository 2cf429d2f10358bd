//! Concurrent fan-out: bounded parallel processing of an async sequence.
//!
//! ```text
//!   single iterator:   puller ──advance/fetch──▶ worker(item) ─┬─ Ready   → done inline
//!                        │   (permit per item)                  └─ Pending → tokio::spawn
//!                        └──▶ finish_pulling ──▶ wait for in-flight workers ──▶ close
//!
//!   partitions:        driver(iter₀) ─┐
//!                      driver(iter₁) ─┼─▶ each runs its items in order, one permit per item,
//!                      driver(iterₙ) ─┘   polled inline and spawned only when it suspends
//! ```
//!
//! Workers that never suspend never reach the scheduler: a run over a
//! synchronous source with synchronous workers completes on its first poll.
//! Faults from the puller, every worker and the final close are collected;
//! one fault is returned as itself, several as [`FlowError::Aggregate`].

mod hooks;
mod session;
mod source;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use nagare_types::{FanOutOutcome, FlowError, FlowResult};

use crate::config::NagareConfig;
use crate::iter::{AsyncEnumerable, AsyncIterator};

use session::{LeaveGuard, Session, guarded};

pub use hooks::FanOutHooks;
pub use source::{ConcurrentSession, ConcurrentSource, concurrent_source};

/// Worker bound used when none is configured.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Bounded concurrent enumeration.
///
/// `max_workers == 0` removes the bound.
#[derive(Debug, Clone)]
pub struct FanOut {
    max_workers: usize,
    cancel: Option<CancellationToken>,
    hooks: FanOutHooks,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

impl FanOut {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            cancel: None,
            hooks: FanOutHooks::default(),
        }
    }

    pub fn from_config(config: &NagareConfig) -> Self {
        Self::new(config.max_workers)
    }

    /// Stop pulling once `token` fires; the run reports `Cancelled`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_hooks(mut self, hooks: FanOutHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn control(&self) -> Control {
        Control {
            permits: (self.max_workers > 0).then(|| Arc::new(Semaphore::new(self.max_workers))),
            cancel: self.cancel.clone(),
        }
    }

    /// Run `action` for every item of `source`; returns the number of items
    /// whose worker succeeded.
    pub async fn run<E, F, Fut>(&self, source: &E, action: F) -> FlowResult<u64>
    where
        E: AsyncEnumerable + ?Sized,
        E::Item: 'static,
        F: Fn(E::Item) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<()>> + Send + 'static,
    {
        self.run_detailed(source, action).await.into_result()
    }

    /// Like [`run`](Self::run), without folding faults into an error.
    pub async fn run_detailed<E, F, Fut>(&self, source: &E, action: F) -> FanOutOutcome
    where
        E: AsyncEnumerable + ?Sized,
        E::Item: 'static,
        F: Fn(E::Item) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<()>> + Send + 'static,
    {
        match source.iter() {
            Ok(iter) => self.run_iter_detailed(iter, action).await,
            Err(err) => FanOutOutcome {
                faults: vec![err],
                ..FanOutOutcome::default()
            },
        }
    }

    /// Single-iterator mode over an iterator the caller already opened.
    /// The iterator is closed before this returns.
    pub async fn run_iter<I, F, Fut>(&self, iter: I, action: F) -> FlowResult<u64>
    where
        I: AsyncIterator,
        I::Item: 'static,
        F: Fn(I::Item) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<()>> + Send + 'static,
    {
        self.run_iter_detailed(iter, action).await.into_result()
    }

    #[tracing::instrument(level = "debug", skip_all, fields(max_workers = self.max_workers))]
    pub async fn run_iter_detailed<I, F, Fut>(&self, iter: I, action: F) -> FanOutOutcome
    where
        I: AsyncIterator,
        I::Item: 'static,
        F: Fn(I::Item) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<()>> + Send + 'static,
    {
        let session = Arc::new(Session::new(self.hooks.clone()));
        let control = self.control();
        let action = Arc::new(action);
        session.hooks().start();
        tracing::debug!("fan-out started");

        if let Err(err) = pull(&iter, &control, &session, &action).await {
            session.fault(err);
        }
        session.finish_pulling().await;
        close_into(&iter, &session).await;

        finish(&session)
    }

    /// Multi-iterator mode: one sequential driver per partition.
    pub async fn run_partitions<I, F, Fut>(&self, partitions: Vec<I>, action: F) -> FlowResult<u64>
    where
        I: AsyncIterator + 'static,
        I::Item: 'static,
        F: Fn(I::Item) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<()>> + Send + 'static,
    {
        self.run_partitions_detailed(partitions, action)
            .await
            .into_result()
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(max_workers = self.max_workers, partitions = partitions.len())
    )]
    pub async fn run_partitions_detailed<I, F, Fut>(
        &self,
        partitions: Vec<I>,
        action: F,
    ) -> FanOutOutcome
    where
        I: AsyncIterator + 'static,
        I::Item: 'static,
        F: Fn(I::Item) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FlowResult<()>> + Send + 'static,
    {
        let session = Arc::new(Session::new(self.hooks.clone()));
        let control = self.control();
        let action = Arc::new(action);
        session.hooks().start();
        tracing::debug!("fan-out started");

        for iter in partitions {
            let driver = drive_partition(iter, control.clone(), session.clone(), action.clone());
            launch(&session, driver).await;
        }
        session.finish_pulling().await;

        finish(&session)
    }
}

/// Run `action` over `source` with at most `max_workers` in flight.
pub async fn run_concurrently<E, F, Fut>(
    source: &E,
    max_workers: usize,
    action: F,
) -> FlowResult<u64>
where
    E: AsyncEnumerable + ?Sized,
    E::Item: 'static,
    F: Fn(E::Item) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FlowResult<()>> + Send + 'static,
{
    FanOut::new(max_workers).run(source, action).await
}

/// Worker bound and cancellation, shared by the puller and every driver.
#[derive(Clone)]
struct Control {
    permits: Option<Arc<Semaphore>>,
    cancel: Option<CancellationToken>,
}

impl Control {
    fn check_cancelled(&self) -> FlowResult<()> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(FlowError::Cancelled);
        }
        Ok(())
    }

    async fn advance<I: AsyncIterator>(&self, iter: &I) -> FlowResult<bool> {
        let Some(token) = &self.cancel else {
            return iter.advance().await;
        };
        self.check_cancelled()?;
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(FlowError::Cancelled),
            advanced = iter.advance() => advanced,
        }
    }

    async fn acquire(&self) -> FlowResult<Option<OwnedSemaphorePermit>> {
        let Some(semaphore) = &self.permits else {
            return Ok(None);
        };
        let acquire = semaphore.clone().acquire_owned();
        let permit = match &self.cancel {
            None => acquire.await,
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(FlowError::Cancelled),
                permit = acquire => permit,
            },
        };
        permit
            .map(Some)
            .map_err(|err| FlowError::Callback(err.into()))
    }
}

/// The single-iterator puller loop.
async fn pull<I, F, Fut>(
    iter: &I,
    control: &Control,
    session: &Arc<Session>,
    action: &Arc<F>,
) -> FlowResult<()>
where
    I: AsyncIterator,
    I::Item: 'static,
    F: Fn(I::Item) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FlowResult<()>> + Send + 'static,
{
    loop {
        if !control.advance(iter).await? {
            return Ok(());
        }
        let Some(item) = iter.fetch() else {
            continue;
        };
        let permit = control.acquire().await?;
        control.check_cancelled()?;

        let action = action.clone();
        let recorder = session.clone();
        launch(session, async move {
            let _permit = permit;
            let result = guarded(async move { action(item).await }).await;
            recorder.record(result);
        })
        .await;
    }
}

/// One partition: its items run in order, each under its own permit.
async fn drive_partition<I, F, Fut>(
    iter: I,
    control: Control,
    session: Arc<Session>,
    action: Arc<F>,
) where
    I: AsyncIterator,
    F: Fn(I::Item) -> Fut + Send + Sync,
    Fut: Future<Output = FlowResult<()>> + Send,
{
    let pulled = guarded(async {
        loop {
            if !control.advance(&iter).await? {
                return Ok(());
            }
            let Some(item) = iter.fetch() else {
                continue;
            };
            let _permit = control.acquire().await?;
            control.check_cancelled()?;
            session.record(guarded(async { action(item).await }).await);
        }
    })
    .await;

    if let Err(err) = pulled {
        session.fault(err);
    }
    close_into(&iter, &session).await;
}

/// Poll `work` once inline and hand it to the runtime only if it suspends.
async fn launch<W>(session: &Arc<Session>, work: W)
where
    W: Future<Output = ()> + Send + 'static,
{
    session.enter();
    let done = LeaveGuard(session.clone());
    let mut task = Box::pin(async move {
        // A panic escaping the worker itself (a hook, a partition close) is
        // still a fault of this run
        if let Err(err) = guarded(async {
            work.await;
            Ok::<(), FlowError>(())
        })
        .await
        {
            done.0.fault(err);
        }
        drop(done);
    });
    if futures::poll!(task.as_mut()).is_pending() {
        session.spawned();
        tracing::trace!("worker suspended, spawning");
        tokio::spawn(task);
    }
}

/// Close a driven iterator, unwinding-aware.
///
/// A close fault is recorded only when the run has not already faulted;
/// otherwise it is logged and dropped so the earlier fault wins. A panicking
/// close is always recorded.
async fn close_into<I: AsyncIterator>(iter: &I, session: &Session) {
    drop(iter.fetch());
    let Err(err) = guarded(iter.close()).await else {
        return;
    };
    if session.has_faults() && !matches!(err, FlowError::WorkerPanicked(_)) {
        tracing::debug!(error = %err, "close fault swallowed while unwinding");
    } else {
        session.fault(err);
    }
}

fn finish(session: &Session) -> FanOutOutcome {
    let outcome = session.outcome();
    tracing::debug!(
        items = outcome.items,
        spawned = outcome.spawned,
        faults = outcome.faults.len(),
        "fan-out finished"
    );
    session.hooks().end(&outcome);
    outcome
}
