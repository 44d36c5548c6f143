//! Capture Session - lifecycle manager for screen recordings
//!
//! Turns a one-time authorization grant into a running capture surface →
//! encoder → output sink pipeline, and guarantees every acquired resource is
//! released in order on stop, failure, or shutdown.

mod config;
mod controller;
mod error;
mod events;
mod keepalive;
mod session;

pub use config::*;
pub use controller::*;
pub use error::*;
pub use events::*;
pub use keepalive::*;
pub use session::*;
