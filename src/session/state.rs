use serde::{Deserialize, Serialize};
use std::fmt;

use crate::events::ScanEvent;

/// Session state without its payload, for observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStateKind {
    Idle,
    Scanning,
    Processing,
    Success,
    ErrorDisplay,
}

impl fmt::Display for SessionStateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStateKind::Idle => "idle",
            SessionStateKind::Scanning => "scanning",
            SessionStateKind::Processing => "processing",
            SessionStateKind::Success => "success",
            SessionStateKind::ErrorDisplay => "error_display",
        };
        f.write_str(name)
    }
}

/// Capture session state. A scan is in flight exactly while `Processing`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Scanning,
    Processing {
        event: ScanEvent,
    },
    Success {
        code: String,
    },
    ErrorDisplay {
        message: String,
    },
}

impl SessionState {
    pub fn kind(&self) -> SessionStateKind {
        match self {
            SessionState::Idle => SessionStateKind::Idle,
            SessionState::Scanning => SessionStateKind::Scanning,
            SessionState::Processing { .. } => SessionStateKind::Processing,
            SessionState::Success { .. } => SessionStateKind::Success,
            SessionState::ErrorDisplay { .. } => SessionStateKind::ErrorDisplay,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, SessionState::Processing { .. })
    }

    /// Error message shown while in `ErrorDisplay`
    pub fn message(&self) -> Option<&str> {
        match self {
            SessionState::ErrorDisplay { message } => Some(message),
            _ => None,
        }
    }
}
