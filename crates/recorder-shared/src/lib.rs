//! Shared Types for the Screen Recorder
//!
//! This crate contains the data model shared across the recorder: capture
//! parameters, authorization grants, session state and the output stream seam.

mod authorization;
mod error;
mod io;
mod params;
mod session;

pub use authorization::*;
pub use error::*;
pub use io::*;
pub use params::*;
pub use session::*;

/// Fixed output width in pixels
pub const DEFAULT_WIDTH: u32 = 720;

/// Fixed output height in pixels
pub const DEFAULT_HEIGHT: u32 = 1280;

/// Pixel density used when mirroring the screen into the capture surface
pub const DEFAULT_DENSITY_DPI: u32 = 300;

/// Container MIME type of every recording
pub const VIDEO_MIME_TYPE: &str = "video/mp4";
