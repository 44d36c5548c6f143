//! Screen Capture - capture surface binding for the recorder
//!
//! Mirrors screen contents into the encoder's input surface:
//! - [`InputSurface`]: bounded frame queue owned by the encoder
//! - [`VirtualDisplayBinder`]: producer thread driven at the refresh hint
//! - [`TestPatternSource`]: synthetic source for hosts without a capture backend

mod binder;
mod error;
mod frame;
mod pattern;
mod surface;
mod traits;

pub use binder::*;
pub use error::*;
pub use frame::*;
pub use pattern::*;
pub use surface::*;
pub use traits::*;
