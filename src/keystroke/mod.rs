//! Keyboard-wedge scanner detection.
//!
//! Scanners that emulate a keyboard type a whole code within a few
//! milliseconds and usually end it with Enter. The detector buffers keys,
//! finalizes on Enter, and on inactivity decides by keystroke timing whether
//! the buffer was a scan or someone typing.

mod buffer;
mod detector;
mod source;
mod terminal;
#[cfg(all(target_os = "linux", feature = "wedge"))]
mod wedge;

pub use buffer::{classify_burst, BurstClass, KeystrokeBuffer};
pub use detector::{
    DetectorHandle, DetectorSettings, FocusTarget, Key, KeyInput, KeyOutcome,
    KeystrokeScanDetector,
};
pub use source::{ChannelKeySource, KeyFeeder, KeySource};
pub use terminal::TerminalKeySource;
#[cfg(all(target_os = "linux", feature = "wedge"))]
pub use wedge::WedgeKeySource;
