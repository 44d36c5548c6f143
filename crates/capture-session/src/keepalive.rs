//! Keep-alive announcement contract

use crate::SessionResult;

/// Visible disclosure that background capture is running.
///
/// The controller announces before entering `Capturing` and retracts on every
/// path out of it. Implementations hold no session resources.
pub trait KeepAlive: Send + Sync {
    /// Put the announcement in place
    fn announce(&self, description: &str) -> SessionResult<()>;

    /// Remove the announcement. Must tolerate being called when nothing is shown.
    fn retract(&self);
}

/// Keep-alive for hosts that need no announcement
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentKeepAlive;

impl KeepAlive for SilentKeepAlive {
    fn announce(&self, _description: &str) -> SessionResult<()> {
        Ok(())
    }

    fn retract(&self) {}
}
