//! Video encoding for screen recordings
//!
//! Provides the H.264 frame encoder and the encoder + MP4 muxer pipeline
//! that turns an input surface into a finished container.

mod error;
mod h264;
mod pipeline;
mod traits;

pub use error::*;
pub use h264::*;
pub use pipeline::*;
pub use traits::*;
