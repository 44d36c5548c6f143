//! Synthetic screen source
//!
//! Draws a moving bar over a gradient so encoded output has real motion.
//! Used on hosts without a platform capture backend and in tests.

use bytes::Bytes;
use std::time::Instant;

use crate::{CaptureResult, CapturedFrame, PixelFormat, ScreenSource};

const BAR_WIDTH: u32 = 16;

pub struct TestPatternSource {
    sequence: u64,
}

impl TestPatternSource {
    pub fn new() -> Self {
        Self { sequence: 0 }
    }
}

impl Default for TestPatternSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenSource for TestPatternSource {
    fn name(&self) -> &str {
        "test-pattern"
    }

    fn next_frame(&mut self, width: u32, height: u32) -> CaptureResult<CapturedFrame> {
        let stride = width * 4;
        let mut data = vec![0u8; (stride * height) as usize];
        let bar_x = (self.sequence as u32 * 4) % width.max(1);

        for (y, row) in data.chunks_exact_mut(stride as usize).enumerate() {
            let shade = ((y as u32 * 255) / height.max(1)) as u8;
            for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                let x = x as u32;
                let on_bar = x >= bar_x && x < bar_x + BAR_WIDTH;
                let value = if on_bar { 255 } else { shade };
                // BGRA
                pixel.copy_from_slice(&[value, shade / 2, 255 - value, 255]);
            }
        }

        let frame = CapturedFrame {
            data: Bytes::from(data),
            width,
            height,
            stride,
            format: PixelFormat::Bgra8,
            timestamp: Instant::now(),
            sequence: self.sequence,
        };
        self.sequence += 1;

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_frames_advance() {
        let mut source = TestPatternSource::new();
        let first = source.next_frame(32, 8).unwrap();
        let second = source.next_frame(32, 8).unwrap();

        assert!(first.is_well_formed());
        assert_eq!(first.sequence + 1, second.sequence);
        assert_ne!(first.data, second.data);
    }
}
