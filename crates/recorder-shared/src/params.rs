//! Capture parameters selected before a session starts

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_HEIGHT, DEFAULT_WIDTH, ProtocolError, ProtocolResult};

/// Supported capture frame rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FrameRate {
    Fps30,
    Fps60,
    Fps90,
}

impl FrameRate {
    pub fn as_u32(self) -> u32 {
        match self {
            FrameRate::Fps30 => 30,
            FrameRate::Fps60 => 60,
            FrameRate::Fps90 => 90,
        }
    }

    /// Interval between two frames at this rate
    pub fn frame_interval(self) -> Duration {
        Duration::from_secs_f64(1.0 / self.as_u32() as f64)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::Fps30
    }
}

impl TryFrom<u32> for FrameRate {
    type Error = ProtocolError;

    fn try_from(value: u32) -> ProtocolResult<Self> {
        match value {
            30 => Ok(FrameRate::Fps30),
            60 => Ok(FrameRate::Fps60),
            90 => Ok(FrameRate::Fps90),
            other => Err(ProtocolError::UnsupportedFrameRate(other)),
        }
    }
}

impl From<FrameRate> for u32 {
    fn from(rate: FrameRate) -> Self {
        rate.as_u32()
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// User-facing quality tier, mapped to a target bitrate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

impl QualityTier {
    /// Target bitrate in bits per second
    pub fn bitrate_bps(self) -> u32 {
        match self {
            QualityTier::High => 8_000_000,
            QualityTier::Medium => 4_000_000,
            QualityTier::Low => 1_500_000,
        }
    }
}

impl Default for QualityTier {
    fn default() -> Self {
        Self::Medium
    }
}

impl FromStr for QualityTier {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(QualityTier::High),
            "medium" => Ok(QualityTier::Medium),
            "low" => Ok(QualityTier::Low),
            _ => Err(ProtocolError::UnknownQuality(s.to_string())),
        }
    }
}

/// Parameters of one capture session. Immutable once the session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureParameters {
    pub frame_rate: FrameRate,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    pub width: u32,
    pub height: u32,
}

impl CaptureParameters {
    /// Build validated parameters
    pub fn new(frame_rate: FrameRate, bitrate: u32, width: u32, height: u32) -> ProtocolResult<Self> {
        let params = Self {
            frame_rate,
            bitrate,
            width,
            height,
        };
        params.validate()?;
        Ok(params)
    }

    /// Parameters at the fixed output resolution for a frame rate and quality tier
    pub fn for_quality(frame_rate: FrameRate, quality: QualityTier) -> Self {
        Self {
            frame_rate,
            bitrate: quality.bitrate_bps(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }

    /// Width/height positive and even, bitrate positive
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ProtocolError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.bitrate == 0 {
            return Err(ProtocolError::InvalidBitrate);
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_rate.frame_interval()
    }
}

impl Default for CaptureParameters {
    fn default() -> Self {
        Self::for_quality(FrameRate::default(), QualityTier::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_rate_conversion() {
        assert_eq!(FrameRate::try_from(60).unwrap(), FrameRate::Fps60);
        assert_eq!(
            FrameRate::try_from(24),
            Err(ProtocolError::UnsupportedFrameRate(24))
        );
        assert_eq!(u32::from(FrameRate::Fps90), 90);
    }

    #[test]
    fn test_quality_tiers() {
        assert_eq!("High".parse::<QualityTier>().unwrap().bitrate_bps(), 8_000_000);
        assert_eq!(" medium ".parse::<QualityTier>().unwrap().bitrate_bps(), 4_000_000);
        assert_eq!("LOW".parse::<QualityTier>().unwrap().bitrate_bps(), 1_500_000);
        assert!("ultra".parse::<QualityTier>().is_err());
    }

    #[test]
    fn test_parameter_validation() {
        assert!(CaptureParameters::new(FrameRate::Fps30, 4_000_000, 720, 1280).is_ok());
        assert!(CaptureParameters::new(FrameRate::Fps30, 4_000_000, 721, 1280).is_err());
        assert!(CaptureParameters::new(FrameRate::Fps30, 4_000_000, 0, 1280).is_err());
        assert_eq!(
            CaptureParameters::new(FrameRate::Fps30, 0, 720, 1280),
            Err(ProtocolError::InvalidBitrate)
        );
    }

    #[test]
    fn test_defaults_match_fixed_resolution() {
        let params = CaptureParameters::default();
        assert_eq!(params.width, 720);
        assert_eq!(params.height, 1280);
        assert_eq!(params.frame_rate, FrameRate::Fps30);
        assert_eq!(params.bitrate, 4_000_000);
    }

    #[test]
    fn test_frame_rate_rejected_when_deserializing() {
        let json = r#"{"frame_rate": 45, "bitrate": 1000, "width": 2, "height": 2}"#;
        assert!(serde_json::from_str::<CaptureParameters>(json).is_err());

        let json = r#"{"frame_rate": 90, "bitrate": 1000, "width": 2, "height": 2}"#;
        let params: CaptureParameters = serde_json::from_str(json).unwrap();
        assert_eq!(params.frame_rate, FrameRate::Fps90);
    }
}
