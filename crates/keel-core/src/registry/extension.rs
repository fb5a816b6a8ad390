//! The extension contract.

use async_trait::async_trait;
use serde_json::Value;

use keel_protocols::error::ExtensionError;
use keel_protocols::extension::ExtensionMetadata;
use keel_protocols::health::HealthCheck;

use super::context::ExtensionContext;

/// A pluggable component driven through the registry's lifecycle.
///
/// Instances are built by an [`ExtensionFactory`] during initialization.
/// `initialize` receives the kernel handles; background work should watch
/// [`ExtensionContext::cancellation_token`], which is cancelled right before
/// `stop` runs.
#[async_trait]
pub trait Extension: Send + Sync + 'static {
    /// Static description. Must not depend on initialization.
    fn metadata(&self) -> &ExtensionMetadata;

    /// Reject configuration the extension cannot work with. Runs at
    /// registration, after the required-key presence check.
    fn validate_config(&self, _config: &Value) -> Result<(), ExtensionError> {
        Ok(())
    }

    async fn initialize(&mut self, ctx: ExtensionContext) -> Result<(), ExtensionError>;

    async fn start(&mut self) -> Result<(), ExtensionError> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ExtensionError> {
        Ok(())
    }

    async fn health_check(&self) -> HealthCheck {
        HealthCheck::healthy()
    }
}

/// Builds extension instances from their configuration.
///
/// Implemented for any `Fn(&Value) -> Result<Box<dyn Extension>, _>`.
pub trait ExtensionFactory: Send + Sync {
    fn create(&self, config: &Value) -> Result<Box<dyn Extension>, ExtensionError>;
}

impl<F> ExtensionFactory for F
where
    F: Fn(&Value) -> Result<Box<dyn Extension>, ExtensionError> + Send + Sync,
{
    fn create(&self, config: &Value) -> Result<Box<dyn Extension>, ExtensionError> {
        self(config)
    }
}
