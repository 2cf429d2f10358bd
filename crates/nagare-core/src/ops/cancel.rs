//! Cooperative cancellation at advance boundaries.

use tokio_util::sync::CancellationToken;

use nagare_types::{FlowError, FlowResult};

use crate::iter::{AsyncEnumerable, AsyncIterator, Cursor, Producer};

/// Upstream enumerable that faults with `Cancelled` once `token` fires.
#[derive(Debug, Clone)]
pub struct Cancellable<E> {
    upstream: E,
    token: CancellationToken,
}

impl<E> Cancellable<E> {
    pub(crate) fn new(upstream: E, token: CancellationToken) -> Self {
        Self { upstream, token }
    }
}

impl<E: AsyncEnumerable> AsyncEnumerable for Cancellable<E> {
    type Item = E::Item;
    type Iter = Cursor<CancelProducer<E::Iter>>;

    fn iter(&self) -> FlowResult<Self::Iter> {
        Ok(Cursor::new(CancelProducer {
            upstream: self.upstream.iter()?,
            token: self.token.clone(),
        }))
    }
}

pub struct CancelProducer<I> {
    upstream: I,
    token: CancellationToken,
}

impl<I: AsyncIterator> Producer for CancelProducer<I> {
    type Item = I::Item;

    async fn produce(&mut self) -> FlowResult<Option<I::Item>> {
        if self.token.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        // Losing the race drops the upstream advance, which ends the upstream
        let advanced = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(FlowError::Cancelled),
            advanced = self.upstream.advance() => advanced?,
        };
        Ok(if advanced { self.upstream.fetch() } else { None })
    }

    async fn close(&mut self) -> FlowResult<()> {
        self.upstream.close().await
    }
}
