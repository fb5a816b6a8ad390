//! # Keel Core
//!
//! Runtime kernel for the Keel application framework.
//!
//! ## Components
//!
//! - [`ServiceContainer`] - Typed dependency injection with lazy, at-most-once construction
//! - [`ExtensionRegistry`] - Extension registration, dependency ordering and lifecycle
//! - [`EventBus`] - Asynchronous publish/subscribe with FIFO delivery
//! - [`StateManager`] - Shared key/value state with transactions and observers
//! - [`Application`] - Owns the components above and sequences their lifecycles

pub mod application;
pub mod container;
pub mod error;
pub mod event_bus;
pub mod lifecycle;
pub mod registry;
pub mod state;

pub use application::{Application, ApplicationHealth, ComponentsHealth};
pub use container::{Dependencies, ServiceContainer, ServiceDescriptor};
pub use error::KernelError;
pub use event_bus::{EventBus, EventBusStats, SubscriptionId};
pub use lifecycle::{ApplicationState, Lifecycle, ShutdownSignal};
pub use registry::{
    Extension, ExtensionContext, ExtensionFactory, ExtensionInfo, ExtensionRegistry, KernelHandle,
};
pub use state::{ObserverId, STATE_CHANGED, StateManager, TransactionId};
