//! Video encoder and pipeline abstractions

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use capture::{CapturedFrame, InputSurface};
use recorder_shared::{CaptureParameters, WritableStream};

use crate::{EncoderError, EncoderResult};

/// Settings handed to a [`VideoEncoder`]
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u32,
    pub fps: u32,
    /// Frames between forced IDR frames
    pub keyframe_interval: u32,
}

impl EncoderConfig {
    /// H.264 4:2:0 needs even dimensions
    pub fn validate(&self) -> EncoderResult<()> {
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(EncoderError::UnsupportedResolution {
                width: self.width,
                height: self.height,
            });
        }
        if self.fps == 0 || self.bitrate_bps == 0 || self.keyframe_interval == 0 {
            return Err(EncoderError::InvalidConfig(format!(
                "fps={}, bitrate={}, keyframe_interval={}",
                self.fps, self.bitrate_bps, self.keyframe_interval
            )));
        }
        Ok(())
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::from(&CaptureParameters::default())
    }
}

impl From<&CaptureParameters> for EncoderConfig {
    fn from(params: &CaptureParameters) -> Self {
        let fps = params.frame_rate.as_u32();
        Self {
            width: params.width,
            height: params.height,
            bitrate_bps: params.bitrate,
            fps,
            keyframe_interval: fps * 2,
        }
    }
}

/// One access unit in Annex-B form
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub keyframe: bool,
    /// Sequence number of the captured frame it came from
    pub sequence: u64,
}

/// Frame-level video encoder
pub trait VideoEncoder: Send {
    fn init(&mut self, config: EncoderConfig) -> EncoderResult<()>;

    /// `None` when the encoder produced no bitstream for this frame
    fn encode(&mut self, frame: &CapturedFrame) -> EncoderResult<Option<EncodedFrame>>;

    /// Make the next encoded frame an IDR frame
    fn request_keyframe(&mut self);

    fn frames_encoded(&self) -> u64;
}

/// Mid-capture failure reported by a running pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineFault {
    /// The encoder rejected a frame or was reclaimed
    Encoder(String),
    /// Writing to the container failed
    Muxer(String),
    /// The capture source stopped producing frames
    SourceLost(String),
}

impl std::fmt::Display for PipelineFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineFault::Encoder(reason) => write!(f, "encoder failure: {}", reason),
            PipelineFault::Muxer(reason) => write!(f, "muxer failure: {}", reason),
            PipelineFault::SourceLost(reason) => write!(f, "capture source lost: {}", reason),
        }
    }
}

/// Invoked from the encode worker when a running pipeline fails
pub type FaultCallback = Arc<dyn Fn(PipelineFault) + Send + Sync>;

/// What a finished pipeline wrote
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalizeReport {
    pub frames_encoded: u64,
    /// Frames dropped at the input surface
    pub frames_dropped: u64,
    pub keyframes: u64,
    /// Media duration written to the container
    pub duration: Duration,
    /// Mid-capture failure that ended the stream early, if any
    pub fault: Option<PipelineFault>,
}

/// Encoder + muxer pipeline driven by the session state machine.
///
/// `release` must be safe to call in any state, any number of times.
pub trait EncoderPipeline: Send {
    /// Prepare the encoder for `params` and hand out its input surface
    fn configure(&mut self, params: &CaptureParameters) -> EncoderResult<InputSurface>;

    /// Begin encoding frames from the input surface into `output`
    fn start(&mut self, output: Box<dyn WritableStream>, on_fault: FaultCallback)
    -> EncoderResult<()>;

    /// Encode every frame submitted so far and write the container index
    fn finalize_and_flush(&mut self) -> EncoderResult<FinalizeReport>;

    /// Tear down the encoder. Idempotent.
    fn release(&mut self);
}

/// Creates one pipeline per capture session
pub trait EncoderFactory: Send + Sync {
    fn create(&self) -> Box<dyn EncoderPipeline>;
}
