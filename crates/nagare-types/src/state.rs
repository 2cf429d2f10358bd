//! Iterator state register: the lock-free guard around advance/fetch/close.
//!
//! ```text
//!   Fresh ──┐
//!           ├──▶ Advancing ──▶ ItemReady ──▶ ItemConsumed ──▶ Advancing ──▶ …
//!   Reserved┘        │
//!                    └──▶ Ended ──▶ Closing ──▶ Closed
//! ```
//!
//! `Reserved` behaves like `Fresh` but marks a leased exclusive iterator.
//! Every transition is a compare-and-swap on a single `AtomicU8`; nothing here
//! blocks.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{FlowError, FlowResult};

/// Lifecycle state of an async iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IterState {
    /// Created, never advanced.
    Fresh = 0,
    /// Leased from an exclusive enumerable, never advanced.
    Reserved = 1,
    /// An `advance` is in flight.
    Advancing = 2,
    /// A value is waiting in the slot for `fetch`.
    ItemReady = 3,
    /// The last value was fetched.
    ItemConsumed = 4,
    /// The sequence is exhausted (or faulted).
    Ended = 5,
    /// Cleanup is running.
    Closing = 6,
    /// Cleanup finished.
    Closed = 7,
}

impl IterState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => IterState::Fresh,
            1 => IterState::Reserved,
            2 => IterState::Advancing,
            3 => IterState::ItemReady,
            4 => IterState::ItemConsumed,
            5 => IterState::Ended,
            6 => IterState::Closing,
            _ => IterState::Closed,
        }
    }

    /// States from which `advance` may start.
    pub fn can_advance(self) -> bool {
        matches!(
            self,
            IterState::Fresh | IterState::Reserved | IterState::ItemReady | IterState::ItemConsumed
        )
    }

    /// States from which `close` may start.
    pub fn can_close(self) -> bool {
        matches!(
            self,
            IterState::Fresh | IterState::Reserved | IterState::Ended | IterState::ItemConsumed
        )
    }

    /// Closing or closed.
    pub fn is_closed(self) -> bool {
        matches!(self, IterState::Closing | IterState::Closed)
    }
}

impl fmt::Display for IterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IterState::Fresh => "fresh",
            IterState::Reserved => "reserved",
            IterState::Advancing => "advancing",
            IterState::ItemReady => "item-ready",
            IterState::ItemConsumed => "item-consumed",
            IterState::Ended => "ended",
            IterState::Closing => "closing",
            IterState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What `begin_advance` decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceGate {
    /// The caller owns the advance and must finish it.
    Proceed,
    /// The sequence already ended; report `false` without touching the producer.
    Exhausted,
}

/// Atomic state register shared by cursors and exclusive leases.
#[derive(Debug)]
pub struct StateRegister {
    state: AtomicU8,
}

impl StateRegister {
    /// A register starting in `Fresh`.
    pub const fn new() -> Self {
        Self::with_state(IterState::Fresh)
    }

    pub const fn with_state(state: IterState) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
        }
    }

    /// Current state.
    pub fn load(&self) -> IterState {
        IterState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Single compare-and-swap. On failure returns the state actually found.
    pub fn transition(&self, from: IterState, to: IterState) -> Result<(), IterState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(IterState::from_u8)
    }

    /// Claim the right to advance.
    pub fn begin_advance(&self) -> FlowResult<AdvanceGate> {
        let mut current = self.load();
        loop {
            match current {
                s if s.can_advance() => match self.transition(s, IterState::Advancing) {
                    Ok(()) => return Ok(AdvanceGate::Proceed),
                    Err(actual) => current = actual,
                },
                IterState::Ended => return Ok(AdvanceGate::Exhausted),
                IterState::Closing | IterState::Closed => return Err(FlowError::AlreadyClosed),
                state => {
                    return Err(FlowError::ConcurrentAccess {
                        operation: "advance",
                        state,
                    });
                }
            }
        }
    }

    /// Finish an advance this caller claimed.
    ///
    /// Returns false if the register was no longer `Advancing`.
    pub fn finish_advance(&self, has_item: bool) -> bool {
        let next = if has_item {
            IterState::ItemReady
        } else {
            IterState::Ended
        };
        self.transition(IterState::Advancing, next).is_ok()
    }

    /// Move an in-flight advance straight to `Ended` (fault or abandonment).
    pub fn abandon_advance(&self) {
        let _ = self.transition(IterState::Advancing, IterState::Ended);
    }

    /// Claim the ready value. Only one caller per advance wins.
    pub fn try_consume(&self) -> bool {
        self.transition(IterState::ItemReady, IterState::ItemConsumed)
            .is_ok()
    }

    /// Claim the right to close.
    pub fn begin_close(&self) -> FlowResult<()> {
        let mut current = self.load();
        loop {
            match current {
                s if s.can_close() => match self.transition(s, IterState::Closing) {
                    Ok(()) => return Ok(()),
                    Err(actual) => current = actual,
                },
                IterState::Closing | IterState::Closed => return Err(FlowError::AlreadyClosed),
                state => {
                    return Err(FlowError::ConcurrentAccess {
                        operation: "close",
                        state,
                    });
                }
            }
        }
    }

    /// Mark cleanup finished.
    pub fn finish_close(&self) {
        self.state.store(IterState::Closed as u8, Ordering::Release);
    }

    /// Return a closing register to `Fresh` so it can be leased again.
    pub fn reset(&self) {
        self.state.store(IterState::Fresh as u8, Ordering::Release);
    }

    /// Lease a fresh register (`Fresh → Reserved`).
    pub fn reserve(&self) -> FlowResult<()> {
        match self.transition(IterState::Fresh, IterState::Reserved) {
            Ok(()) => Ok(()),
            Err(IterState::Closed) => Err(FlowError::AlreadyClosed),
            Err(state) => Err(FlowError::ConcurrentAccess {
                operation: "acquire",
                state,
            }),
        }
    }
}

impl Default for StateRegister {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_cycle() {
        let reg = StateRegister::new();
        assert_eq!(reg.begin_advance().unwrap(), AdvanceGate::Proceed);
        assert!(reg.finish_advance(true));
        assert_eq!(reg.load(), IterState::ItemReady);
        assert!(reg.try_consume());
        assert!(!reg.try_consume());
        assert_eq!(reg.begin_advance().unwrap(), AdvanceGate::Proceed);
        assert!(reg.finish_advance(false));
        assert_eq!(reg.load(), IterState::Ended);
        reg.begin_close().unwrap();
        reg.finish_close();
        assert_eq!(reg.load(), IterState::Closed);
    }

    #[test]
    fn test_advance_while_advancing_faults() {
        let reg = StateRegister::new();
        reg.begin_advance().unwrap();
        let err = reg.begin_advance().unwrap_err();
        assert!(matches!(
            err,
            FlowError::ConcurrentAccess {
                operation: "advance",
                state: IterState::Advancing
            }
        ));
    }

    #[test]
    fn test_ended_is_sticky() {
        let reg = StateRegister::with_state(IterState::Ended);
        for _ in 0..3 {
            assert_eq!(reg.begin_advance().unwrap(), AdvanceGate::Exhausted);
        }
    }

    #[test]
    fn test_advance_after_close_faults() {
        let reg = StateRegister::with_state(IterState::Closed);
        assert!(matches!(
            reg.begin_advance(),
            Err(FlowError::AlreadyClosed)
        ));
    }

    #[test]
    fn test_close_legal_states() {
        for state in [
            IterState::Fresh,
            IterState::Reserved,
            IterState::Ended,
            IterState::ItemConsumed,
        ] {
            let reg = StateRegister::with_state(state);
            assert!(reg.begin_close().is_ok(), "close should be legal from {state}");
        }
    }

    #[test]
    fn test_close_illegal_states() {
        for state in [IterState::Advancing, IterState::ItemReady] {
            let reg = StateRegister::with_state(state);
            assert!(matches!(
                reg.begin_close(),
                Err(FlowError::ConcurrentAccess { operation: "close", .. })
            ));
        }
    }

    #[test]
    fn test_double_close_faults() {
        let reg = StateRegister::new();
        reg.begin_close().unwrap();
        assert!(matches!(reg.begin_close(), Err(FlowError::AlreadyClosed)));
        reg.finish_close();
        assert!(matches!(reg.begin_close(), Err(FlowError::AlreadyClosed)));
    }

    #[test]
    fn test_reserve_is_exclusive() {
        let reg = StateRegister::new();
        reg.reserve().unwrap();
        assert!(matches!(
            reg.reserve(),
            Err(FlowError::ConcurrentAccess { operation: "acquire", .. })
        ));
        reg.begin_close().unwrap();
        reg.reset();
        assert!(reg.reserve().is_ok());
    }

    #[test]
    fn test_abandon_moves_to_ended() {
        let reg = StateRegister::new();
        reg.begin_advance().unwrap();
        reg.abandon_advance();
        assert_eq!(reg.load(), IterState::Ended);
        // Only an in-flight advance is abandoned
        reg.abandon_advance();
        assert_eq!(reg.load(), IterState::Ended);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(IterState::ItemConsumed.to_string(), "item-consumed");
        assert_eq!(IterState::Fresh.to_string(), "fresh");
    }
}
