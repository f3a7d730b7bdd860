mod decoder;
mod dedupe;
mod engine;
mod linear;
#[cfg(feature = "qr")]
mod matrix;
pub mod mock;
mod stats;
#[cfg(test)]
mod tests;

pub use decoder::{CodeFormat, Decoded, DecoderFactory, DecoderSet, SymbologyDecoder, SymbologySet};
pub use dedupe::DuplicateFilter;
pub use engine::{
    AttemptCallback, DetectCallback, Detection, EngineSettings, FaultCallback, OpticalDecodeEngine,
    PreviewSink,
};
pub use linear::EanDecoder;
#[cfg(feature = "qr")]
pub use matrix::QrDecoder;
pub use stats::{AttemptStats, ScanAttempt};
