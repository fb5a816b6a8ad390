//! Handles given to extensions during initialization.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use keel_protocols::error::{ExtensionError, ServiceError};
use keel_protocols::event::Event;
use keel_protocols::service::Service;

use crate::container::ServiceContainer;
use crate::event_bus::EventBus;
use crate::state::StateManager;

/// The kernel components an extension may use.
#[derive(Clone)]
pub struct KernelHandle {
    pub services: Arc<ServiceContainer>,
    pub events: Arc<EventBus>,
    pub state: Arc<StateManager>,
}

impl KernelHandle {
    pub fn new(
        services: Arc<ServiceContainer>,
        events: Arc<EventBus>,
        state: Arc<StateManager>,
    ) -> Self {
        Self {
            services,
            events,
            state,
        }
    }
}

impl Default for KernelHandle {
    fn default() -> Self {
        Self::new(
            Arc::new(ServiceContainer::new()),
            Arc::new(EventBus::new()),
            Arc::new(StateManager::new()),
        )
    }
}

/// Context passed to [`Extension::initialize`](super::Extension::initialize).
#[derive(Clone)]
pub struct ExtensionContext {
    name: String,
    config: Value,
    kernel: KernelHandle,
    cancellation: CancellationToken,
}

impl ExtensionContext {
    pub fn new(
        name: impl Into<String>,
        config: Value,
        kernel: KernelHandle,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            kernel,
            cancellation,
        }
    }

    /// Name of the extension being initialized.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Deserialize the whole configuration.
    pub fn config_as<T: DeserializeOwned>(&self) -> Result<T, ExtensionError> {
        let config = if self.config.is_null() {
            Value::Object(Default::default())
        } else {
            self.config.clone()
        };
        serde_json::from_value(config).map_err(|e| ExtensionError::Configuration {
            extension: self.name.clone(),
            message: e.to_string(),
        })
    }

    pub fn services(&self) -> &Arc<ServiceContainer> {
        &self.kernel.services
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.kernel.events
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.kernel.state
    }

    /// Resolve a service from the container.
    pub async fn service<T: Service>(&self) -> Result<Arc<T>, ServiceError> {
        self.kernel.services.get::<T>().await
    }

    /// Publish an event with this extension as its source.
    pub fn publish(&self, event_type: impl Into<String>, data: Option<keel_protocols::Metadata>) {
        let mut event = Event::new(event_type, self.name.clone());
        event.data = data;
        self.kernel.events.publish(event);
    }

    /// Cancelled before the extension's `stop` hook runs.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Settings {
        #[serde(default)]
        interval: u64,
    }

    fn context(config: Value) -> ExtensionContext {
        ExtensionContext::new(
            "probe",
            config,
            KernelHandle::default(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_config_as() {
        let ctx = context(json!({"interval": 5}));
        let settings: Settings = ctx.config_as().unwrap();
        assert_eq!(settings.interval, 5);

        let defaults: Settings = context(Value::Null).config_as().unwrap();
        assert_eq!(defaults.interval, 0);
    }

    #[test]
    fn test_config_as_invalid() {
        let ctx = context(json!({"interval": "soon"}));
        let err = ctx.config_as::<Settings>().unwrap_err();
        assert!(matches!(err, ExtensionError::Configuration { ref extension, .. } if extension == "probe"));
    }

    #[test]
    fn test_cancellation() {
        let token = CancellationToken::new();
        let ctx = ExtensionContext::new("probe", Value::Null, KernelHandle::default(), token.clone());
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_publish_uses_extension_as_source() {
        let ctx = context(Value::Null);
        ctx.publish("hello", None);
        assert_eq!(ctx.events().stats().published, 1);
        assert_eq!(ctx.name(), "probe");
    }
}
