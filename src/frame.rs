use image::{imageops, GrayImage};
use std::sync::Arc;
use std::time::SystemTime;

/// Single-channel 8-bit frame handed to the decoders
#[derive(Debug, Clone)]
pub struct LumaFrame {
    /// Frame sequence number assigned by the capture backend
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Row-major luma samples, `width * height` bytes
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

impl LumaFrame {
    /// Create a frame from tightly packed luma samples
    pub fn new(id: u64, data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            id,
            timestamp: SystemTime::now(),
            data: Arc::new(data),
            width,
            height,
        }
    }

    /// Create a frame from a plane whose rows are `stride` bytes apart
    pub fn from_strided(id: u64, plane: &[u8], width: u32, height: u32, stride: u32) -> Option<Self> {
        if stride == width {
            let size = (width * height) as usize;
            return plane.get(..size).map(|d| Self::new(id, d.to_vec(), width, height));
        }

        let mut packed = Vec::with_capacity((width * height) as usize);
        for row in 0..height {
            let start = (row * stride) as usize;
            packed.extend_from_slice(plane.get(start..start + width as usize)?);
        }
        Some(Self::new(id, packed, width, height))
    }

    /// Check the sample buffer matches the declared dimensions
    pub fn validate_size(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize
    }

    /// Luma value at (x, y); callers keep coordinates in range
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }

    /// One row of samples
    pub fn row(&self, y: u32) -> &[u8] {
        let start = (y * self.width) as usize;
        &self.data[start..start + self.width as usize]
    }

    pub fn to_gray_image(&self) -> Option<GrayImage> {
        GrayImage::from_raw(self.width, self.height, self.data.as_ref().clone())
    }

    /// Copy of this frame rotated 90 degrees clockwise
    pub fn rotated_90(&self) -> Option<Self> {
        let rotated = imageops::rotate90(&self.to_gray_image()?);
        let (width, height) = rotated.dimensions();
        Some(Self {
            id: self.id,
            timestamp: self.timestamp,
            data: Arc::new(rotated.into_raw()),
            width,
            height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strided_frame_is_packed() {
        // 2x2 image with one byte of padding per row
        let plane = [1, 2, 0, 3, 4, 0];
        let frame = LumaFrame::from_strided(7, &plane, 2, 2, 3).unwrap();
        assert_eq!(frame.data.as_slice(), &[1, 2, 3, 4]);
        assert!(frame.validate_size());
        assert_eq!(frame.luma(1, 1), 4);
    }

    #[test]
    fn test_short_plane_is_rejected() {
        assert!(LumaFrame::from_strided(0, &[1, 2, 3], 2, 2, 2).is_none());
        assert!(LumaFrame::from_strided(0, &[1, 2, 0, 3], 2, 2, 3).is_none());
    }

    #[test]
    fn test_rotate_90() {
        // 3 wide, 1 high
        let frame = LumaFrame::new(1, vec![10, 20, 30], 3, 1);
        let rotated = frame.rotated_90().unwrap();
        assert_eq!((rotated.width, rotated.height), (1, 3));
        assert_eq!(rotated.data.as_slice(), &[10, 20, 30]);
        assert_eq!(rotated.row(2), &[30]);
    }
}
