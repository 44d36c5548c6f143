//! Captured frame data structures

use bytes::Bytes;
use std::time::Instant;

/// Pixel format of the captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// BGRA 8-bit per channel
    Bgra8,
    /// RGBA 8-bit per channel
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }
}

/// Captured frame data
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Raw pixel data
    pub data: Bytes,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Stride (bytes per row, may include padding)
    pub stride: u32,
    /// Pixel format
    pub format: PixelFormat,
    /// Capture timestamp
    pub timestamp: Instant,
    /// Frame sequence number
    pub sequence: u64,
}

impl CapturedFrame {
    /// Whether `data` holds at least `stride * height` bytes with room for every row
    pub fn is_well_formed(&self) -> bool {
        let min_stride = self.width as usize * self.format.bytes_per_pixel();
        (self.stride as usize) >= min_stride
            && self.data.len() >= self.stride as usize * self.height as usize
    }
}
