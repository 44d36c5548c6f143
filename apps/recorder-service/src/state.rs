//! Shared handler state

use std::sync::Arc;

use capture_session::SessionController;
use recorder_shared::AuthorizationRequest;

use crate::broker::ConsentBroker;
use crate::keepalive::StatusAnnouncer;

#[derive(Clone)]
pub struct AppState {
    pub controller: SessionController,
    pub broker: Arc<ConsentBroker>,
    pub announcer: Arc<StatusAnnouncer>,
    /// Used for fields a start request leaves out
    pub defaults: AuthorizationRequest,
}
