//! Capture authorization broker
//!
//! Stands in for the platform consent dialog: every request completes
//! asynchronously with either a freshly minted one-time grant or a denial.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use recorder_shared::{AuthorizationOutcome, AuthorizationRequest, AuthorizationToken};
use tokio::sync::oneshot;
use tracing::{info, warn};

#[cfg(target_os = "macos")]
fn has_screen_recording_permission() -> bool {
    core_graphics::access::ScreenCaptureAccess::default().preflight()
}

#[cfg(target_os = "macos")]
fn request_screen_recording_permission() -> bool {
    core_graphics::access::ScreenCaptureAccess::default().request()
}

#[cfg(not(target_os = "macos"))]
fn has_screen_recording_permission() -> bool {
    true
}

#[cfg(not(target_os = "macos"))]
fn request_screen_recording_permission() -> bool {
    true
}

/// How the broker answers requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentPolicy {
    AutoGrant,
    DenyAll,
}

/// Authorization result that has not arrived yet
pub struct PendingAuthorization {
    rx: oneshot::Receiver<AuthorizationOutcome>,
}

impl PendingAuthorization {
    /// Wait for the decision; `None` if the broker went away without one
    pub async fn outcome(self) -> Option<AuthorizationOutcome> {
        self.rx.await.ok()
    }
}

pub struct ConsentBroker {
    policy: ConsentPolicy,
    token_ttl: Duration,
    width: u32,
    height: u32,
    issued: AtomicU64,
}

impl ConsentBroker {
    pub fn new(policy: ConsentPolicy, token_ttl: Duration, width: u32, height: u32) -> Self {
        Self {
            policy,
            token_ttl,
            width,
            height,
            issued: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> ConsentPolicy {
        self.policy
    }

    /// Grants minted so far
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    /// Ask for a one-time capture grant
    pub fn request(&self, request: AuthorizationRequest) -> PendingAuthorization {
        let (tx, rx) = oneshot::channel();
        let outcome = self.decide(request);
        // Receiver may already be gone if the caller gave up
        let _ = tx.send(outcome);
        PendingAuthorization { rx }
    }

    fn decide(&self, request: AuthorizationRequest) -> AuthorizationOutcome {
        if self.policy == ConsentPolicy::DenyAll {
            info!("Capture request denied by policy");
            return AuthorizationOutcome::Denied {
                reason: "capture denied by policy".to_string(),
            };
        }

        if !has_screen_recording_permission() && !request_screen_recording_permission() {
            warn!("Screen recording permission not granted");
            return AuthorizationOutcome::Denied {
                reason: "screen recording permission not granted".to_string(),
            };
        }

        let params = recorder_shared::CaptureParameters {
            width: self.width,
            height: self.height,
            ..request.capture_parameters()
        };
        let payload = format!(
            "{}x{}@{}:{}",
            params.width, params.height, params.frame_rate, params.bitrate
        )
        .into_bytes();
        let token = AuthorizationToken::issue(payload, self.token_ttl);
        self.issued.fetch_add(1, Ordering::Relaxed);

        info!(
            "Capture grant {} issued, expires {}",
            token.grant_id(),
            token.expires_at()
        );
        AuthorizationOutcome::Granted { token, params }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recorder_shared::{FrameRate, QualityTier};

    fn request() -> AuthorizationRequest {
        AuthorizationRequest {
            frame_rate: FrameRate::Fps60,
            quality: QualityTier::High,
        }
    }

    #[tokio::test]
    #[cfg_attr(target_os = "macos", ignore)]
    async fn test_auto_grant_mints_fresh_tokens() {
        let broker = ConsentBroker::new(ConsentPolicy::AutoGrant, Duration::from_secs(60), 720, 1280);

        let first = broker.request(request()).outcome().await.unwrap();
        let second = broker.request(request()).outcome().await.unwrap();

        let (first, params) = match first {
            AuthorizationOutcome::Granted { token, params } => (token, params),
            other => panic!("expected grant, got {:?}", other),
        };
        let second = match second {
            AuthorizationOutcome::Granted { token, .. } => token,
            other => panic!("expected grant, got {:?}", other),
        };

        assert_ne!(first.grant_id(), second.grant_id());
        assert!(!first.is_expired());
        assert_eq!(params.frame_rate, FrameRate::Fps60);
        assert_eq!(params.bitrate, 8_000_000);
        assert_eq!((params.width, params.height), (720, 1280));
        assert_eq!(broker.issued(), 2);
    }

    #[tokio::test]
    async fn test_deny_policy() {
        let broker = ConsentBroker::new(ConsentPolicy::DenyAll, Duration::from_secs(60), 720, 1280);
        let outcome = broker.request(request()).outcome().await.unwrap();
        assert!(!outcome.is_granted());
        assert_eq!(broker.issued(), 0);
    }
}
