use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::frame::LumaFrame;

/// Concrete barcode formats the decoders can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeFormat {
    QrCode,
    DataMatrix,
    Aztec,
    Ean13,
    Ean8,
    UpcA,
}

impl CodeFormat {
    /// 2D formats
    pub fn is_matrix(&self) -> bool {
        matches!(
            self,
            CodeFormat::QrCode | CodeFormat::DataMatrix | CodeFormat::Aztec
        )
    }
}

impl fmt::Display for CodeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodeFormat::QrCode => "QR_CODE",
            CodeFormat::DataMatrix => "DATA_MATRIX",
            CodeFormat::Aztec => "AZTEC",
            CodeFormat::Ean13 => "EAN_13",
            CodeFormat::Ean8 => "EAN_8",
            CodeFormat::UpcA => "UPC_A",
        };
        f.write_str(name)
    }
}

/// Which symbology families are enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbologySet {
    pub linear: bool,
    pub matrix: bool,
}

impl SymbologySet {
    pub fn all() -> Self {
        Self {
            linear: true,
            matrix: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.linear && !self.matrix
    }
}

impl Default for SymbologySet {
    fn default() -> Self {
        Self::all()
    }
}

/// A successful decode of one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub code: String,
    pub format: CodeFormat,
}

/// One symbology decoder over luma frames
pub trait SymbologyDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Look for a code in `frame`; `None` means nothing was found this frame
    fn decode(&self, frame: &LumaFrame) -> Option<Decoded>;
}

/// The decoders built for one symbology configuration
pub struct DecoderSet {
    decoders: Vec<Box<dyn SymbologyDecoder>>,
}

/// Builds a decoder set whenever the enabled symbologies change
pub type DecoderFactory = Arc<dyn Fn(SymbologySet) -> DecoderSet + Send + Sync>;

impl DecoderSet {
    /// Built-in decoders for the enabled families
    pub fn for_symbologies(symbologies: SymbologySet) -> Self {
        let mut decoders: Vec<Box<dyn SymbologyDecoder>> = Vec::new();

        if symbologies.matrix {
            #[cfg(feature = "qr")]
            decoders.push(Box::new(super::matrix::QrDecoder::new()));

            #[cfg(not(feature = "qr"))]
            warn!("Matrix codes enabled but the crate was built without the qr feature");
        }

        if symbologies.linear {
            decoders.push(Box::new(super::linear::EanDecoder::new()));
        }

        if decoders.is_empty() {
            warn!("No symbology decoders enabled; frames will never produce a result");
        }

        let set = Self { decoders };
        debug!("Built decoder set: {:?}", set.names());
        set
    }

    pub fn custom(decoders: Vec<Box<dyn SymbologyDecoder>>) -> Self {
        Self { decoders }
    }

    pub fn default_factory() -> DecoderFactory {
        Arc::new(Self::for_symbologies)
    }

    /// First result from any decoder
    pub fn decode(&self, frame: &LumaFrame) -> Option<Decoded> {
        self.decoders.iter().find_map(|decoder| decoder.decode(frame))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.decoders.iter().map(|d| d.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}
