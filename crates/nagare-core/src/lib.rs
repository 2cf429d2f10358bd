//! nagare-core (流れ): pull-based asynchronous iteration.
//!
//! This crate provides:
//!
//! - **Iterator protocol**: `advance` / `fetch` / `close` over an atomic state
//!   machine ([`AsyncIterator`], [`Cursor`], [`Exclusive`])
//! - **Sources**: enumerables built from closures, producers and plain iterators
//! - **Operators**: lazy filter / map / flatten / take / skip / type-filter,
//!   with batch-buffering variants for async callbacks
//! - **Terminal operators**: first, any/all, fold/aggregate, count
//! - **Fan-out**: bounded concurrent enumeration with aggregated faults
//! - **Config**: TOML defaults for worker bounds and batch limits

pub mod config;
pub mod fanout;
pub mod iter;
pub mod ops;
pub mod source;
pub mod terminal;

pub use config::NagareConfig;
pub use fanout::{
    ConcurrentSession, ConcurrentSource, FanOut, FanOutHooks, concurrent_source, run_concurrently,
};
pub use iter::{
    AsyncEnumerable, AsyncIterator, AsyncIteratorExt, BoxAsyncIterator, BoxEnumerable, Cursor,
    DynAsyncEnumerable, DynAsyncIterator, Exclusive, Lease, Producer, close_after,
};
pub use ops::{AsyncEnumerableExt, BatchOptions, DEFAULT_BATCH_LIMIT, StepOutcome};
pub use source::{empty, exclusive, from_fn, from_iter, from_producer, once, producer_fn};

// The data vocabulary lives in the leaf crate; re-export it so most users
// only depend on nagare-core.
pub use nagare_types::{
    AggregateError, FanOutOutcome, FlowError, FlowResult, IterState, StateRegister,
};
