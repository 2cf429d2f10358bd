//! Fan-out outcome: what a concurrent run produced before faults are folded.

use crate::error::{FlowError, FlowResult};

/// Result of one fan-out run.
#[derive(Debug, Default)]
pub struct FanOutOutcome {
    /// Items whose worker completed successfully.
    pub items: u64,
    /// Workers (or partition drivers) that suspended and were spawned onto
    /// the runtime. Zero means the whole run completed inline.
    pub spawned: u64,
    /// Every fault recorded, in the order it was recorded.
    pub faults: Vec<FlowError>,
}

impl FanOutOutcome {
    /// True when no worker ever suspended.
    pub fn completed_inline(&self) -> bool {
        self.spawned == 0
    }

    pub fn is_ok(&self) -> bool {
        self.faults.is_empty()
    }

    /// Fold faults into a single error, or return the item count.
    pub fn into_result(self) -> FlowResult<u64> {
        match FlowError::aggregate(self.faults) {
            None => Ok(self.items),
            Some(err) => Err(err),
        }
    }
}
