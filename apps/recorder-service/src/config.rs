//! Service configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use capture_session::SessionConfig;
use clap::Parser;
use recorder_shared::{DEFAULT_HEIGHT, DEFAULT_WIDTH, FrameRate, QualityTier};
use serde::{Deserialize, Serialize};

/// Background screen recording service
#[derive(Parser, Debug, Default)]
#[command(name = "recorderd", version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "RECORDERD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address of the local control API
    #[arg(long, env = "RECORDERD_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Directory recordings are written to
    #[arg(long, env = "RECORDERD_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Deny every capture authorization request
    #[arg(long)]
    pub deny_capture: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    pub output_dir: PathBuf,
    pub default_frame_rate: FrameRate,
    pub default_quality: QualityTier,
    pub width: u32,
    pub height: u32,
    pub phase_timeout_ms: u64,
    pub finalize_timeout_ms: u64,
    /// Lifetime of a minted capture grant
    pub token_ttl_secs: u64,
    /// Grant capture requests without asking
    pub auto_grant: bool,
    pub heartbeat_secs: u64,
    pub log_filter: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7878)),
            output_dir: default_output_dir(),
            default_frame_rate: FrameRate::default(),
            default_quality: QualityTier::default(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            phase_timeout_ms: 5_000,
            finalize_timeout_ms: 10_000,
            token_ttl_secs: 60,
            auto_grant: true,
            heartbeat_secs: 10,
            log_filter: "recorderd=info,capture_session=info,capture=info,encoder=info,media_store=info,tower_http=debug".to_string(),
        }
    }
}

/// `<user video dir>/ScreenRecorder`, or `./recordings` without one
pub fn default_output_dir() -> PathBuf {
    dirs::video_dir()
        .map(|dir| dir.join("ScreenRecorder"))
        .unwrap_or_else(|| PathBuf::from("recordings"))
}

impl ServiceConfig {
    /// Read a JSON config file; absent keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// File values (if any) with command-line overrides applied
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(listen) = cli.listen {
            config.listen_addr = listen;
        }
        if let Some(output_dir) = &cli.output_dir {
            config.output_dir = output_dir.clone();
        }
        if cli.deny_capture {
            config.auto_grant = false;
        }

        Ok(config)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            phase_timeout: Duration::from_millis(self.phase_timeout_ms),
            finalize_timeout: Duration::from_millis(self.finalize_timeout_ms),
            ..SessionConfig::default()
        }
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}
