//! # Keel Config
//!
//! Configuration management for the Keel kernel: TOML schema, loader with
//! `${VAR}` substitution, and validation.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
