//! Dependency-injection container.

mod descriptor;
mod service_container;

pub use descriptor::{Dependencies, ServiceDescriptor};
pub use service_container::ServiceContainer;
