//! Observation hooks for fan-out runs.

use std::fmt;
use std::sync::Arc;

use nagare_types::{FanOutOutcome, FlowError};

type StartHook = Arc<dyn Fn() + Send + Sync>;
type ItemHook = Arc<dyn Fn(Result<(), &FlowError>) + Send + Sync>;
type EndHook = Arc<dyn Fn(&FanOutOutcome) + Send + Sync>;

/// Optional callbacks invoked around a fan-out run.
///
/// `on_item` runs on whichever task finished the item, so it must be cheap
/// and must not block. Unset hooks cost a single `Option` check.
#[derive(Clone, Default)]
pub struct FanOutHooks {
    on_start: Option<StartHook>,
    on_item: Option<ItemHook>,
    on_end: Option<EndHook>,
}

impl FanOutHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once before the first advance.
    pub fn on_start(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }

    /// Called once per finished worker item, with its result.
    pub fn on_item(
        mut self,
        hook: impl Fn(Result<(), &FlowError>) + Send + Sync + 'static,
    ) -> Self {
        self.on_item = Some(Arc::new(hook));
        self
    }

    /// Called once after every worker finished and the source was closed.
    pub fn on_end(mut self, hook: impl Fn(&FanOutOutcome) + Send + Sync + 'static) -> Self {
        self.on_end = Some(Arc::new(hook));
        self
    }

    pub(crate) fn start(&self) {
        if let Some(hook) = &self.on_start {
            hook();
        }
    }

    pub(crate) fn item(&self, result: Result<(), &FlowError>) {
        if let Some(hook) = &self.on_item {
            hook(result);
        }
    }

    pub(crate) fn end(&self, outcome: &FanOutOutcome) {
        if let Some(hook) = &self.on_end {
            hook(outcome);
        }
    }
}

impl fmt::Debug for FanOutHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanOutHooks")
            .field("on_start", &self.on_start.is_some())
            .field("on_item", &self.on_item.is_some())
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}
