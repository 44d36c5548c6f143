//! Recording indicator and heartbeat
//!
//! The announcer only mirrors what the controller tells it. It holds no
//! session resources and reads the session through `query_state`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use capture_session::{KeepAlive, SessionController, SessionResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use recorder_shared::SessionState;
use serde::Serialize;
use tracing::{debug, info, warn};

/// What the indicator currently shows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Announcement {
    pub description: String,
    pub since: DateTime<Utc>,
    /// Distinguishes announcements made within the same clock tick
    #[serde(skip)]
    serial: u64,
}

#[derive(Debug, Default)]
pub struct StatusAnnouncer {
    current: RwLock<Option<Announcement>>,
    announced: AtomicU64,
}

impl StatusAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Announcement> {
        self.current.read().clone()
    }

    /// Log progress while capturing and clear an indicator that outlived its session.
    ///
    /// The indicator is read before the state, and only the indicator that
    /// was read is cleared, so a session that starts in between keeps its own.
    pub fn heartbeat(&self, query_state: impl FnOnce() -> SessionState) {
        let current = self.current();
        let state = query_state();
        match (state, current) {
            (SessionState::Capturing, Some(announcement)) => {
                let elapsed = Utc::now() - announcement.since;
                info!(
                    "Recording in progress: {} ({}s)",
                    announcement.description,
                    elapsed.num_seconds()
                );
            }
            (SessionState::Idle, Some(announcement)) => {
                let mut current = self.current.write();
                if current.as_ref() == Some(&announcement) {
                    warn!(
                        "Clearing stale recording indicator: {}",
                        announcement.description
                    );
                    *current = None;
                }
            }
            (state, _) => debug!("Heartbeat: session {}", state),
        }
    }
}

impl KeepAlive for StatusAnnouncer {
    fn announce(&self, description: &str) -> SessionResult<()> {
        info!("Recording indicator shown: {}", description);
        *self.current.write() = Some(Announcement {
            description: description.to_string(),
            since: Utc::now(),
            serial: self.announced.fetch_add(1, Ordering::SeqCst),
        });
        Ok(())
    }

    fn retract(&self) {
        if self.current.write().take().is_some() {
            info!("Recording indicator cleared");
        }
    }
}

/// Run the heartbeat until the task is aborted
pub async fn run_heartbeat(
    announcer: Arc<StatusAnnouncer>,
    controller: SessionController,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        announcer.heartbeat(|| controller.query_state());
    }
}
