//! Request handlers for the sidecar surface.

mod events;
mod tables;

pub use events::*;
pub use tables::*;
