//! Application: owns the kernel components and sequences their lifecycles.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use keel_config::Config;
use keel_protocols::extension::ExtensionMetadata;
use keel_protocols::health::{HealthCheck, HealthStatus};

use crate::container::ServiceContainer;
use crate::error::KernelError;
use crate::event_bus::EventBus;
use crate::lifecycle::{ApplicationState, Lifecycle, ShutdownSignal};
use crate::registry::{ExtensionFactory, ExtensionRegistry, KernelHandle};
use crate::state::StateManager;

/// Per-component health.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComponentsHealth {
    pub event_bus: HealthCheck,
    pub state_manager: HealthCheck,
    pub service_container: BTreeMap<String, HealthCheck>,
    pub extensions: BTreeMap<String, HealthCheck>,
}

impl ComponentsHealth {
    /// Worst status across every component and entry.
    pub fn status(&self) -> HealthStatus {
        [&self.event_bus, &self.state_manager]
            .into_iter()
            .chain(self.service_container.values())
            .chain(self.extensions.values())
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status))
    }
}

/// Health report of the whole application.
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationHealth {
    pub status: HealthStatus,
    pub running: bool,
    pub startup_complete: bool,
    pub shutdown_complete: bool,
    pub components: ComponentsHealth,
    pub timestamp: DateTime<Utc>,
}

/// One running kernel instance.
///
/// Startup: event bus, persisted state, extension initialization, service
/// start hooks, extension start. Shutdown runs the reverse: extensions,
/// services, then the event bus drains and halts.
pub struct Application {
    config: Config,
    services: Arc<ServiceContainer>,
    events: Arc<EventBus>,
    state: Arc<StateManager>,
    extensions: Arc<ExtensionRegistry>,
    lifecycle: Lifecycle,
}

impl Application {
    pub fn new(config: Config) -> Self {
        let events = Arc::new(EventBus::from_config(&config.event_bus));
        let state = Arc::new(StateManager::from_config(&config.state, Some(events.clone())));
        Self {
            services: Arc::new(ServiceContainer::new()),
            events,
            state,
            extensions: Arc::new(ExtensionRegistry::new()),
            lifecycle: Lifecycle::new(),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn services(&self) -> &Arc<ServiceContainer> {
        &self.services
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.extensions
    }

    /// Handles passed to extensions.
    pub fn kernel_handle(&self) -> KernelHandle {
        KernelHandle::new(self.services.clone(), self.events.clone(), self.state.clone())
    }

    pub fn application_state(&self) -> ApplicationState {
        self.lifecycle.state()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Triggered when shutdown begins.
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        self.lifecycle.shutdown_signal()
    }

    /// Register an extension under `name`, configured from
    /// `[extensions.config.<name>]`. Names listed in `extensions.disabled`
    /// are registered disabled.
    pub fn register_extension<F>(
        &self,
        name: &str,
        factory: F,
    ) -> Result<ExtensionMetadata, KernelError>
    where
        F: ExtensionFactory + 'static,
    {
        let config = self.config.extension_config(name);
        let metadata = self.extensions.register_named(name, factory, config)?;
        if self.config.extensions.disabled.iter().any(|d| d == name) {
            self.extensions.disable_extension(name)?;
        }
        Ok(metadata)
    }

    /// Register an extension with explicit configuration.
    pub fn register_extension_with_config<F>(
        &self,
        factory: F,
        config: Value,
    ) -> Result<ExtensionMetadata, KernelError>
    where
        F: ExtensionFactory + 'static,
    {
        Ok(self.extensions.register_extension(factory, config)?)
    }

    /// Run the startup sequence. On failure everything already started is
    /// stopped again and the first error is returned.
    pub async fn start(&self) -> Result<(), KernelError> {
        self.lifecycle.begin_start()?;
        info!("Starting {}...", self.config.kernel.name);

        if let Err(e) = self.startup().await {
            error!("Startup failed: {}", e);
            if let Err(cleanup) = self.stop().await {
                warn!("Cleanup after failed startup also failed: {}", cleanup);
            }
            return Err(e);
        }

        self.lifecycle.mark_running();
        info!("{} started", self.config.kernel.name);
        Ok(())
    }

    async fn startup(&self) -> Result<(), KernelError> {
        self.events.start().await?;
        let loaded = self.state.load_state().await?;
        if loaded > 0 {
            info!("Restored {} state entries", loaded);
        }
        self.extensions
            .initialize_extensions(&self.kernel_handle())
            .await?;
        self.services.start().await?;
        self.extensions.start_extensions().await?;
        Ok(())
    }

    /// Run the shutdown sequence. Every step runs even if an earlier one
    /// fails; the first failure is returned.
    pub async fn stop(&self) -> Result<(), KernelError> {
        if !self.lifecycle.begin_stop() {
            return Ok(());
        }
        info!("Stopping {}...", self.config.kernel.name);

        let mut first_error: Option<KernelError> = None;
        if let Err(e) = self.extensions.stop_extensions().await {
            warn!("Extension shutdown error: {}", e);
            first_error.get_or_insert(e.into());
        }
        if let Err(e) = self.services.stop().await {
            warn!("Service shutdown error: {}", e);
            first_error.get_or_insert(e.into());
        }
        self.events.stop().await;

        self.lifecycle.mark_stopped();
        info!("{} stopped", self.config.kernel.name);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Aggregate health. Never fails: a panic while collecting is reported
    /// as `unhealthy`.
    pub async fn health_check(&self) -> ApplicationHealth {
        let collected = AssertUnwindSafe(self.collect_health()).catch_unwind().await;
        let (status, components) = match collected {
            // Unhealthy components only degrade the application.
            Ok(components) if components.status().is_healthy() => {
                (HealthStatus::Healthy, components)
            }
            Ok(components) => (HealthStatus::Degraded, components),
            Err(_) => {
                error!("Health check panicked");
                (HealthStatus::Unhealthy, ComponentsHealth::default())
            }
        };
        ApplicationHealth {
            status,
            running: self.lifecycle.is_running(),
            startup_complete: self.lifecycle.startup_complete(),
            shutdown_complete: self.lifecycle.shutdown_complete(),
            components,
            timestamp: Utc::now(),
        }
    }

    async fn collect_health(&self) -> ComponentsHealth {
        ComponentsHealth {
            event_bus: self.events.health_check(),
            state_manager: self.state.health_check(),
            service_container: self.services.health_check().await,
            extensions: self.extensions.health_check().await,
        }
    }
}

impl Default for Application {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
#[path = "application_tests.rs"]
mod tests;
