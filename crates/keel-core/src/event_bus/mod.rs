//! Publish/subscribe event bus with a single delivery loop.

mod bus;
mod subscription;

pub use bus::{EventBus, EventBusStats};
pub use subscription::{EventFilter, SubscriptionId};
