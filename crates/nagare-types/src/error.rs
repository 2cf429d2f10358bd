//! Flow errors: protocol faults, callback faults, and aggregates.
//!
//! Errors fall into four groups:
//! - **Protocol faults**: misuse of the advance/fetch/close protocol
//!   (`ConcurrentAccess`, `AlreadyClosed`). Never retried.
//! - **Callback faults**: anything a producer, predicate, selector or worker
//!   returned (`Callback`), plus `WorkerPanicked` and `Cancelled`.
//! - **Aggregate faults**: two or more faults collected by a fan-out run.
//! - **Empty-sequence faults**: `first`/seedless `aggregate` on nothing.

use std::fmt;

use thiserror::Error;

use crate::state::IterState;

/// Result type for flow operations.
pub type FlowResult<T> = Result<T, FlowError>;

/// Errors raised while driving an async sequence.
#[derive(Debug, Error)]
pub enum FlowError {
    /// An operation was attempted from a state that forbids it, usually
    /// because another `advance` is still in flight.
    #[error("concurrent access violation: {operation} called while iterator is {state}")]
    ConcurrentAccess {
        operation: &'static str,
        state: IterState,
    },

    /// The iterator (or lease) has already been closed.
    #[error("object already closed")]
    AlreadyClosed,

    /// `first` or a seedless `aggregate` ran over an empty sequence.
    #[error("sequence contains no elements")]
    EmptySequence,

    /// A cancellation token fired before the operation could proceed.
    #[error("operation cancelled")]
    Cancelled,

    /// A fan-out worker panicked instead of returning.
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    /// A user callback (producer, predicate, selector, worker) failed.
    #[error(transparent)]
    Callback(#[from] anyhow::Error),

    /// More than one fault was collected.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl FlowError {
    /// Build a callback fault from a message.
    pub fn callback<M>(msg: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        FlowError::Callback(anyhow::Error::msg(msg))
    }

    /// Fold a list of faults: none → `None`, one → itself, more → `Aggregate`.
    pub fn aggregate(mut faults: Vec<FlowError>) -> Option<FlowError> {
        match faults.len() {
            0 => None,
            1 => faults.pop(),
            _ => Some(FlowError::Aggregate(AggregateError { faults })),
        }
    }

    /// True for misuse of the iterator protocol.
    pub fn is_protocol_fault(&self) -> bool {
        matches!(
            self,
            FlowError::ConcurrentAccess { .. } | FlowError::AlreadyClosed
        )
    }

    /// The underlying faults: the aggregate's list, or just this one.
    pub fn faults(&self) -> &[FlowError] {
        match self {
            FlowError::Aggregate(agg) => agg.faults(),
            other => std::slice::from_ref(other),
        }
    }
}

/// Two or more faults collected during one fan-out run.
#[derive(Debug)]
pub struct AggregateError {
    faults: Vec<FlowError>,
}

impl AggregateError {
    /// Wrap a list of faults.
    ///
    /// Prefer [`FlowError::aggregate`], which unwraps single faults.
    pub fn new(faults: Vec<FlowError>) -> Self {
        Self { faults }
    }

    pub fn faults(&self) -> &[FlowError] {
        &self.faults
    }

    pub fn len(&self) -> usize {
        self.faults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }

    pub fn into_faults(self) -> Vec<FlowError> {
        self.faults
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} faults occurred", self.faults.len())?;
        for (i, fault) in self.faults.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{fault}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_empty_is_none() {
        assert!(FlowError::aggregate(Vec::new()).is_none());
    }

    #[test]
    fn test_aggregate_single_unwraps() {
        let err = FlowError::aggregate(vec![FlowError::Cancelled]).unwrap();
        assert!(matches!(err, FlowError::Cancelled));
        assert_eq!(err.faults().len(), 1);
    }

    #[test]
    fn test_aggregate_many_keeps_all() {
        let err = FlowError::aggregate(vec![
            FlowError::callback("one"),
            FlowError::callback("two"),
            FlowError::Cancelled,
        ])
        .unwrap();

        assert!(matches!(err, FlowError::Aggregate(_)));
        assert_eq!(err.faults().len(), 3);
        assert_eq!(
            err.to_string(),
            "3 faults occurred: one; two; operation cancelled"
        );
    }

    #[test]
    fn test_protocol_fault_classification() {
        assert!(FlowError::AlreadyClosed.is_protocol_fault());
        assert!(
            FlowError::ConcurrentAccess {
                operation: "advance",
                state: IterState::Advancing,
            }
            .is_protocol_fault()
        );
        assert!(!FlowError::EmptySequence.is_protocol_fault());
        assert!(!FlowError::callback("boom").is_protocol_fault());
    }

    #[test]
    fn test_concurrent_access_message() {
        let err = FlowError::ConcurrentAccess {
            operation: "close",
            state: IterState::ItemReady,
        };
        assert_eq!(
            err.to_string(),
            "concurrent access violation: close called while iterator is item-ready"
        );
    }

    #[test]
    fn test_callback_from_anyhow() {
        fn fails() -> FlowResult<()> {
            let inner: anyhow::Result<()> = Err(anyhow::anyhow!("disk on fire"));
            inner?;
            Ok(())
        }
        let err = fails().unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");
    }
}
