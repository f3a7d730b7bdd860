//! Capture session state machine.

mod controller;
mod state;

pub use controller::{ScanSessionController, SessionSettings};
pub use state::{SessionState, SessionStateKind};
