//! Extension-related errors.

use thiserror::Error;

use crate::extension::ExtensionState;

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("Extension not found: {0}")]
    NotFound(String),

    #[error("Extension already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Extension dependency not satisfied: {extension} requires {dependency}")]
    MissingDependency { extension: String, dependency: String },

    #[error("Circular extension dependency: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("Extension {extension} depends on disabled extension {dependency}")]
    DisabledDependency { extension: String, dependency: String },

    #[error("Invalid configuration for {extension}: {message}")]
    Configuration { extension: String, message: String },

    #[error("Extension {extension} failed to {phase}")]
    Lifecycle {
        extension: String,
        phase: &'static str,
        #[source]
        source: Box<ExtensionError>,
    },

    #[error("Extension {extension} cannot move from {from} to {to}")]
    InvalidTransition {
        extension: String,
        from: ExtensionState,
        to: ExtensionState,
    },

    #[error("Extension {0} is required and cannot be disabled")]
    Required(String),

    #[error("Extension initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Extension shutdown failed: {0}")]
    ShutdownFailed(String),

    #[error("{0}")]
    Custom(String),
}

impl ExtensionError {
    /// True for the missing / circular / disabled dependency variants.
    pub fn is_dependency_error(&self) -> bool {
        matches!(
            self,
            ExtensionError::MissingDependency { .. }
                | ExtensionError::CircularDependency { .. }
                | ExtensionError::DisabledDependency { .. }
        )
    }
}
