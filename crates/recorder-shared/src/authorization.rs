//! One-time capture authorization

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CaptureParameters, FrameRate, QualityTier};

/// Upper bound on how long a grant stays redeemable
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Identifier of a platform capture grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantId(pub Uuid);

impl GrantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GrantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Single-use capture grant minted by the authorization broker.
///
/// Deliberately not `Clone`: starting a session moves the token in. A
/// deserialized copy of an already-used grant is rejected by the session.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationToken {
    grant_id: GrantId,
    payload: Vec<u8>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AuthorizationToken {
    /// Mint a token valid for `ttl` from now
    pub fn issue(payload: Vec<u8>, ttl: Duration) -> Self {
        let issued_at = Utc::now();
        let ttl = chrono::Duration::from_std(ttl.min(MAX_TOKEN_TTL))
            .unwrap_or_else(|_| chrono::Duration::days(1));
        Self {
            grant_id: GrantId::new(),
            payload,
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    pub fn grant_id(&self) -> GrantId {
        self.grant_id
    }

    /// Opaque platform data carried by the grant
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// What the user asked for before the authorization dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub frame_rate: FrameRate,
    pub quality: QualityTier,
}

impl AuthorizationRequest {
    pub fn capture_parameters(&self) -> CaptureParameters {
        CaptureParameters::for_quality(self.frame_rate, self.quality)
    }
}

/// Completion of an authorization request, consumed exactly once
#[derive(Debug)]
pub enum AuthorizationOutcome {
    Granted {
        token: AuthorizationToken,
        params: CaptureParameters,
    },
    Denied {
        reason: String,
    },
}

impl AuthorizationOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, AuthorizationOutcome::Granted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expiry() {
        let token = AuthorizationToken::issue(vec![1, 2, 3], Duration::from_secs(60));
        assert!(!token.is_expired());
        assert!(token.is_expired_at(token.expires_at()));
        assert_eq!(token.payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_tokens_have_distinct_grants() {
        let a = AuthorizationToken::issue(Vec::new(), Duration::from_secs(1));
        let b = AuthorizationToken::issue(Vec::new(), Duration::from_secs(1));
        assert_ne!(a.grant_id(), b.grant_id());
    }

    #[test]
    fn test_request_maps_to_fixed_resolution() {
        let request = AuthorizationRequest {
            frame_rate: FrameRate::Fps60,
            quality: QualityTier::High,
        };
        let params = request.capture_parameters();
        assert_eq!(params.bitrate, 8_000_000);
        assert_eq!((params.width, params.height), (720, 1280));
        assert_eq!(params.frame_rate, FrameRate::Fps60);
    }
}
