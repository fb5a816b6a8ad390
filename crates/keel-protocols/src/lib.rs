//! # Keel Protocols
//!
//! Contracts shared between the Keel kernel and the code that plugs into it.
//! Contains only interface definitions and plain data - no implementations.
//!
//! ## Core Traits
//!
//! - [`Service`] - Lifecycle hooks for objects managed by the service container
//! - [`EventHandler`] - Receiver side of an event bus subscription
//!
//! ## Core Types
//!
//! - [`Event`] - Immutable notification delivered by the event bus
//! - [`ExtensionMetadata`] / [`ExtensionState`] - Extension description and state machine
//! - [`HealthCheck`] / [`HealthStatus`] - Structured health reports

pub mod error;
pub mod event;
pub mod extension;
pub mod health;
pub mod service;
pub mod types;

pub use error::{EventError, ExtensionError, ServiceError, StateError};
pub use event::{Event, EventHandler, FnHandler, Topic, WILDCARD, handler_fn};
pub use extension::{ExtensionMetadata, ExtensionState};
pub use health::{HealthCheck, HealthStatus};
pub use service::{Service, ServiceKey};
pub use types::*;
