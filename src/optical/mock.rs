use super::decoder::{CodeFormat, Decoded, SymbologyDecoder};
use crate::frame::LumaFrame;

const MARKER: &[u8] = b"POSCAN:";

/// A frame the [`TextFrameDecoder`] reads back as `code`
pub fn text_frame(id: u64, code: &str) -> LumaFrame {
    let mut data = MARKER.to_vec();
    data.extend_from_slice(code.as_bytes());
    let width = data.len() as u32;
    LumaFrame::new(id, data, width, 1)
}

/// Decoder for frames built by [`text_frame`], for running the pipeline without imagery
#[derive(Debug)]
pub struct TextFrameDecoder {
    format: CodeFormat,
}

impl TextFrameDecoder {
    pub fn new(format: CodeFormat) -> Self {
        Self { format }
    }
}

impl Default for TextFrameDecoder {
    fn default() -> Self {
        Self::new(CodeFormat::QrCode)
    }
}

impl SymbologyDecoder for TextFrameDecoder {
    fn name(&self) -> &'static str {
        "text"
    }

    fn decode(&self, frame: &LumaFrame) -> Option<Decoded> {
        let payload = frame.data.strip_prefix(MARKER)?;
        let code = std::str::from_utf8(payload).ok()?;
        Some(Decoded {
            code: code.to_string(),
            format: self.format,
        })
    }
}
