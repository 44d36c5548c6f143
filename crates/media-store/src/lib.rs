//! Media Store - output sinks for finished recordings
//!
//! Resolves a collision-free location for each recording, stages the bytes
//! under a pending name while the encoder writes, and publishes or discards
//! the artifact when the session ends.

mod error;
mod store;
mod traits;

pub use error::*;
pub use store::*;
pub use traits::*;

/// Suffix carried by artifacts that are still being written
pub const PENDING_SUFFIX: &str = "pending";

/// Suffix given to pending artifacts left behind by a dead process
pub const TRUNCATED_SUFFIX: &str = "truncated";
