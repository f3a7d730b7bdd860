pub mod config;
pub mod consumer;
pub mod device;
pub mod error;
pub mod events;
pub mod field;
pub mod frame;
pub mod keystroke;
pub mod optical;
pub mod session;
mod timer;
pub mod validation;

pub use config::PoscanConfig;
pub use consumer::{ScanConsumer, ScanSink};
pub use device::{
    pick_default, platform_backend, CaptureBackend, CaptureDevice, DeviceManager, MockBackend,
    StreamHandle,
};
pub use error::{ConsumerError, DeviceError, Result, ScanError, ValidationError};
pub use events::{EventBus, PipelineEvent, ScanEvent, ScanSource};
pub use field::{BarcodeInputField, FieldStatus, FieldView};
pub use frame::LumaFrame;
pub use keystroke::{
    classify_burst, BurstClass, ChannelKeySource, FocusTarget, Key, KeyInput, KeySource,
    KeystrokeScanDetector, TerminalKeySource,
};
#[cfg(all(target_os = "linux", feature = "wedge"))]
pub use keystroke::WedgeKeySource;
pub use optical::{CodeFormat, DecoderSet, OpticalDecodeEngine, ScanAttempt, SymbologySet};
pub use session::{ScanSessionController, SessionState, SessionStateKind};
pub use validation::{validate_code, LengthBounds};
