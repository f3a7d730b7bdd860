use tracing::trace;

use super::decoder::{CodeFormat, Decoded, SymbologyDecoder};
use crate::frame::LumaFrame;

/// QR decoding through `rqrr`
#[derive(Debug, Default)]
pub struct QrDecoder;

impl QrDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl SymbologyDecoder for QrDecoder {
    fn name(&self) -> &'static str {
        "qr"
    }

    fn decode(&self, frame: &LumaFrame) -> Option<Decoded> {
        if !frame.validate_size() {
            return None;
        }

        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            frame.width as usize,
            frame.height as usize,
            |x, y| frame.luma(x as u32, y as u32),
        );

        let grids = prepared.detect_grids();
        trace!("Frame {}: {} candidate QR grid(s)", frame.id, grids.len());

        for grid in grids {
            match grid.decode() {
                Ok((_, content)) => {
                    return Some(Decoded {
                        code: content,
                        format: CodeFormat::QrCode,
                    })
                }
                Err(e) => trace!("Grid decode failed: {:?}", e),
            }
        }

        None
    }
}
