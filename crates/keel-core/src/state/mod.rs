//! Shared key/value state with per-key locking and transactional commits.

mod manager;
mod transaction;

pub use manager::{ObserverFn, ObserverId, STATE_CHANGED, StateManager};
pub use transaction::TransactionId;
