//! Pure data types for nagare: flow errors, iterator states, fan-out outcomes.
//!
//! This crate is a leaf dependency with no async runtime. It exists so that
//! producers and consumers can name nagare's error and state vocabulary without
//! pulling in tokio.

pub mod error;
pub mod outcome;
pub mod state;

// Flat re-exports for convenience
pub use error::*;
pub use outcome::*;
pub use state::*;
