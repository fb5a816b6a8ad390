//! Umbrella error for kernel operations.

use thiserror::Error;

use keel_config::ConfigError;
use keel_protocols::error::{EventError, ExtensionError, ServiceError, StateError};

use crate::lifecycle::ApplicationState;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Extension(#[from] ExtensionError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Application cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: ApplicationState,
    },
}
