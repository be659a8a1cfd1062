//! Per-trace runtime tracking and the SLO watchdog.

pub mod state;
pub mod watchdog;

pub use state::{RuntimeState, StageInFlight, StageKey, TraceTimestamps};
pub use watchdog::Watchdog;
