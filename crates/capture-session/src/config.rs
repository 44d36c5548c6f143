//! Session controller configuration

use std::time::Duration;

use recorder_shared::{DEFAULT_DENSITY_DPI, VIDEO_MIME_TYPE};

/// Settings the controller applies to every session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on each setup phase (surface bind, encoder configure and start)
    pub phase_timeout: Duration,
    /// Upper bound on draining the encoder and writing the container index
    pub finalize_timeout: Duration,
    /// Container type requested from the output sink
    pub mime_type: String,
    /// Prefix of generated output names
    pub name_prefix: String,
    /// Density the screen is mirrored at
    pub density_dpi: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            phase_timeout: Duration::from_secs(5),
            finalize_timeout: Duration::from_secs(10),
            mime_type: VIDEO_MIME_TYPE.to_string(),
            name_prefix: "Rec_".to_string(),
            density_dpi: DEFAULT_DENSITY_DPI,
        }
    }
}
