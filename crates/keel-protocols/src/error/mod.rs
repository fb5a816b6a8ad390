//! Error types for the Keel kernel.

mod event;
mod extension;
mod service;
mod state;

pub use event::*;
pub use extension::*;
pub use service::*;
pub use state::*;
