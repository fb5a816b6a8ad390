//! Extension protocol definitions.
//!
//! The behavioural `Extension` trait lives in `keel-core` next to the
//! registry that drives it; this module holds the data both sides agree on.

mod metadata;
mod state;

pub use metadata::*;
pub use state::*;
