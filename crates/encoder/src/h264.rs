//! Software H.264 frame encoder backed by OpenH264

use bytes::Bytes;
use capture::{CapturedFrame, PixelFormat};
use openh264::encoder::{Encoder, EncoderConfig as OpenH264Config, UsageType};
use openh264::formats::YUVBuffer;
use tracing::{debug, info};

use crate::{EncodedFrame, EncoderConfig, EncoderError, EncoderResult, VideoEncoder};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Convert a BGRA/RGBA frame to I420 in `out`.
///
/// Chroma is the mean of each 2x2 block (BT.601, studio range).
pub fn convert_to_i420(frame: &CapturedFrame, out: &mut Vec<u8>) {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let stride = frame.stride as usize;
    let chroma_width = width / 2;
    let luma_len = width * height;
    let chroma_len = chroma_width * (height / 2);

    out.clear();
    out.resize(luma_len + 2 * chroma_len, 0);
    let (luma, chroma) = out.split_at_mut(luma_len);
    let (cb, cr) = chroma.split_at_mut(chroma_len);

    let rgb_at = |x: usize, y: usize| -> (i32, i32, i32) {
        let offset = y * stride + x * 4;
        let px = &frame.data[offset..offset + 3];
        match frame.format {
            PixelFormat::Bgra8 => (px[2] as i32, px[1] as i32, px[0] as i32),
            PixelFormat::Rgba8 => (px[0] as i32, px[1] as i32, px[2] as i32),
        }
    };

    for y in 0..height {
        for x in 0..width {
            let (r, g, b) = rgb_at(x, y);
            luma[y * width + x] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16).clamp(16, 235) as u8;
        }
    }

    for by in 0..height / 2 {
        for bx in 0..chroma_width {
            let (mut r, mut g, mut b) = (0, 0, 0);
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let (pr, pg, pb) = rgb_at(bx * 2 + dx, by * 2 + dy);
                r += pr;
                g += pg;
                b += pb;
            }
            let (r, g, b) = (r / 4, g / 4, b / 4);
            let index = by * chroma_width + bx;
            cb[index] = (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128).clamp(16, 240) as u8;
            cr[index] = (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128).clamp(16, 240) as u8;
        }
    }
}

/// Tuned for screen content: no frame skipping, periodic IDR frames.
pub struct SoftwareH264Encoder {
    encoder: Option<Encoder>,
    config: EncoderConfig,
    frames: u64,
    keyframe_requested: bool,
    scratch: Vec<u8>,
}

impl SoftwareH264Encoder {
    pub fn new() -> Self {
        Self {
            encoder: None,
            config: EncoderConfig::default(),
            frames: 0,
            keyframe_requested: true,
            scratch: Vec::new(),
        }
    }

    fn check_frame(&self, frame: &CapturedFrame) -> EncoderResult<()> {
        if frame.width != self.config.width || frame.height != self.config.height {
            return Err(EncoderError::UnsupportedResolution {
                width: frame.width,
                height: frame.height,
            });
        }
        if !frame.is_well_formed() {
            return Err(EncoderError::EncodingFailed(format!(
                "frame {} holds {} bytes, needs {} rows of {}",
                frame.sequence,
                frame.data.len(),
                frame.height,
                frame.stride
            )));
        }
        Ok(())
    }
}

impl Default for SoftwareH264Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoEncoder for SoftwareH264Encoder {
    fn init(&mut self, config: EncoderConfig) -> EncoderResult<()> {
        config.validate()?;

        let api_config = OpenH264Config::new()
            .set_bitrate_bps(config.bitrate_bps)
            .max_frame_rate(config.fps as f32)
            .usage_type(UsageType::ScreenContentRealTime)
            .enable_skip_frame(false);
        let encoder = Encoder::with_api_config(openh264::OpenH264API::from_source(), api_config)
            .map_err(|e| EncoderError::InitFailed(e.to_string()))?;

        info!(
            "H.264 encoder ready: {}x{} @ {} fps, {} bps, IDR every {} frames",
            config.width, config.height, config.fps, config.bitrate_bps, config.keyframe_interval
        );

        self.encoder = Some(encoder);
        self.config = config;
        self.frames = 0;
        self.keyframe_requested = true;
        Ok(())
    }

    fn encode(&mut self, frame: &CapturedFrame) -> EncoderResult<Option<EncodedFrame>> {
        if self.encoder.is_none() {
            return Err(EncoderError::NotInitialized);
        }
        self.check_frame(frame)?;

        convert_to_i420(frame, &mut self.scratch);
        let yuv = YUVBuffer::from_vec(
            std::mem::take(&mut self.scratch),
            self.config.width as usize,
            self.config.height as usize,
        );

        let keyframe = self.keyframe_requested
            || self.frames % self.config.keyframe_interval as u64 == 0;
        let encoder = self.encoder.as_mut().ok_or(EncoderError::NotInitialized)?;
        if keyframe {
            encoder.force_intra_frame();
        }

        let bitstream = encoder
            .encode(&yuv)
            .map_err(|e| EncoderError::EncodingFailed(e.to_string()))?;

        let mut annex_b = Vec::new();
        for index in 0..bitstream.num_layers() {
            let Some(layer) = bitstream.layer(index) else {
                continue;
            };
            for nal_index in 0..layer.nal_count() {
                if let Some(nal) = layer.nal_unit(nal_index) {
                    if !(nal.starts_with(&START_CODE) || nal.starts_with(&START_CODE[1..])) {
                        annex_b.extend_from_slice(&START_CODE);
                    }
                    annex_b.extend_from_slice(nal);
                }
            }
        }

        if annex_b.is_empty() {
            debug!("No bitstream for frame {}", frame.sequence);
            return Ok(None);
        }

        self.keyframe_requested = false;
        let encoded = EncodedFrame {
            data: Bytes::from(annex_b),
            keyframe,
            sequence: frame.sequence,
        };
        self.frames += 1;
        Ok(Some(encoded))
    }

    fn request_keyframe(&mut self) {
        self.keyframe_requested = true;
    }

    fn frames_encoded(&self) -> u64 {
        self.frames
    }
}
