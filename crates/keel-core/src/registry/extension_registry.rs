//! Extension registry: registration, dependency ordering and lifecycle.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use keel_protocols::error::ExtensionError;
use keel_protocols::extension::{ExtensionMetadata, ExtensionState};
use keel_protocols::health::HealthCheck;

use super::context::{ExtensionContext, KernelHandle};
use super::extension::{Extension, ExtensionFactory};
use super::topology::dependency_order;

type Instance = Arc<Mutex<Box<dyn Extension>>>;

/// A registered extension as reported by [`ExtensionRegistry::list`].
#[derive(Debug, Clone, Serialize)]
pub struct ExtensionInfo {
    pub metadata: ExtensionMetadata,
    pub state: ExtensionState,
}

struct Entry {
    metadata: ExtensionMetadata,
    factory: Arc<dyn ExtensionFactory>,
    config: Value,
    state: ExtensionState,
    instance: Option<Instance>,
    cancellation: Option<CancellationToken>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Names in registration order.
    order: Vec<String>,
    /// Reverse dependency edges, kept even for names not yet registered.
    dependents: HashMap<String, BTreeSet<String>>,
    /// Order computed by the last `initialize_extensions`.
    lifecycle_order: Vec<String>,
}

impl Inner {
    fn entry(&self, name: &str) -> Result<&Entry, ExtensionError> {
        self.entries
            .get(name)
            .ok_or_else(|| ExtensionError::NotFound(name.to_string()))
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut Entry, ExtensionError> {
        self.entries
            .get_mut(name)
            .ok_or_else(|| ExtensionError::NotFound(name.to_string()))
    }
}

/// Registry driving extensions through their state machine.
///
/// Extensions are initialized and started in dependency order and stopped
/// in the reverse order. Instances only exist between initialization and
/// shutdown; registration builds a throwaway instance to read metadata.
pub struct ExtensionRegistry {
    inner: RwLock<Inner>,
    shutdown: CancellationToken,
}

impl ExtensionRegistry {
    /// Create a new extension registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register an extension factory with its configuration.
    ///
    /// Returns the extension's metadata.
    pub fn register_extension<F>(
        &self,
        factory: F,
        config: Value,
    ) -> Result<ExtensionMetadata, ExtensionError>
    where
        F: ExtensionFactory + 'static,
    {
        self.register_arc(Arc::new(factory), config)
    }

    /// Register an already shared factory.
    pub fn register_arc(
        &self,
        factory: Arc<dyn ExtensionFactory>,
        config: Value,
    ) -> Result<ExtensionMetadata, ExtensionError> {
        self.insert(factory, config, None)
    }

    /// Register a factory that must build the extension called `name`.
    pub fn register_named<F>(
        &self,
        name: &str,
        factory: F,
        config: Value,
    ) -> Result<ExtensionMetadata, ExtensionError>
    where
        F: ExtensionFactory + 'static,
    {
        self.insert(Arc::new(factory), config, Some(name))
    }

    fn insert(
        &self,
        factory: Arc<dyn ExtensionFactory>,
        config: Value,
        expected: Option<&str>,
    ) -> Result<ExtensionMetadata, ExtensionError> {
        let probe = factory.create(&config)?;
        let metadata = probe.metadata().clone();
        let name = metadata.name.clone();

        if let Some(expected) = expected.filter(|expected| *expected != name) {
            return Err(ExtensionError::Configuration {
                extension: expected.to_string(),
                message: format!("factory built extension '{}'", name),
            });
        }

        check_required_keys(&metadata, &config)?;
        probe.validate_config(&config).map_err(|e| match e {
            ExtensionError::Configuration { .. } => e,
            other => ExtensionError::Configuration {
                extension: name.clone(),
                message: other.to_string(),
            },
        })?;
        drop(probe);

        let mut inner = self.inner.write();
        if inner.entries.contains_key(&name) {
            return Err(ExtensionError::AlreadyRegistered(name));
        }
        for dependency in &metadata.dependencies {
            inner
                .dependents
                .entry(dependency.clone())
                .or_default()
                .insert(name.clone());
        }
        inner.order.push(name.clone());
        inner.entries.insert(
            name.clone(),
            Entry {
                metadata: metadata.clone(),
                factory,
                config,
                state: ExtensionState::Registered,
                instance: None,
                cancellation: None,
            },
        );

        info!("Registered extension: {} v{}", name, metadata.version);
        Ok(metadata)
    }

    /// Build, then initialize, every extension that needs it, in
    /// dependency order. The first failure aborts the batch.
    pub async fn initialize_extensions(&self, kernel: &KernelHandle) -> Result<(), ExtensionError> {
        let order = self.plan()?;
        info!("Initializing extensions: {:?}", order);

        for name in &order {
            let Some((factory, config)) = self.prepare_initialization(name)? else {
                continue;
            };

            let token = self.shutdown.child_token();
            let ctx = ExtensionContext::new(name.clone(), config.clone(), kernel.clone(), token.clone());

            let outcome = match factory.create(&config) {
                Ok(mut instance) => match instance.initialize(ctx).await {
                    Ok(()) => Ok(instance),
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };

            match outcome {
                Ok(instance) => {
                    let mut inner = self.inner.write();
                    let entry = inner.entry_mut(name)?;
                    entry.instance = Some(Arc::new(Mutex::new(instance)));
                    entry.cancellation = Some(token);
                    debug!("Initialized extension: {}", name);
                }
                Err(e) => {
                    token.cancel();
                    error!("Extension {} failed to initialize: {}", name, e);
                    self.transition(name, ExtensionState::Error)?;
                    return Err(lifecycle_error(name, "initialize", e));
                }
            }
        }
        Ok(())
    }

    /// Start every initialized extension in dependency order.
    pub async fn start_extensions(&self) -> Result<(), ExtensionError> {
        let order = self.inner.read().lifecycle_order.clone();
        for name in &order {
            let instance = {
                let inner = self.inner.read();
                let entry = inner.entry(name)?;
                if entry.state != ExtensionState::Initializing {
                    continue;
                }
                match &entry.instance {
                    Some(instance) => instance.clone(),
                    None => continue,
                }
            };

            let result = instance.lock().await.start().await;
            match result {
                Ok(()) => {
                    self.transition(name, ExtensionState::Active)?;
                    info!("Extension started: {}", name);
                }
                Err(e) => {
                    error!("Extension {} failed to start: {}", name, e);
                    self.transition(name, ExtensionState::Error)?;
                    return Err(lifecycle_error(name, "start", e));
                }
            }
        }
        Ok(())
    }

    /// Stop every active extension in reverse dependency order. All of them
    /// are attempted; the first failure is returned afterwards.
    pub async fn stop_extensions(&self) -> Result<(), ExtensionError> {
        let order = self.inner.read().lifecycle_order.clone();
        let mut first_error = None;

        for name in order.iter().rev() {
            let (instance, token) = {
                let inner = self.inner.read();
                let Ok(entry) = inner.entry(name) else {
                    continue;
                };
                match (entry.state, &entry.instance) {
                    (ExtensionState::Active, Some(instance)) => {
                        (instance.clone(), entry.cancellation.clone())
                    }
                    (ExtensionState::Initializing, _) => {
                        // Never started: release its background work only.
                        if let Some(token) = &entry.cancellation {
                            token.cancel();
                        }
                        continue;
                    }
                    _ => continue,
                }
            };

            if let Some(token) = token {
                token.cancel();
            }
            self.transition(name, ExtensionState::ShuttingDown)?;

            let result = instance.lock().await.stop().await;
            let next = if result.is_ok() {
                ExtensionState::Shutdown
            } else {
                ExtensionState::Error
            };
            {
                let mut inner = self.inner.write();
                let entry = inner.entry_mut(name)?;
                entry.state = next;
                entry.instance = None;
                entry.cancellation = None;
            }

            match result {
                Ok(()) => info!("Extension stopped: {}", name),
                Err(e) => {
                    warn!("Extension {} failed to stop: {}", name, e);
                    first_error.get_or_insert(lifecycle_error(name, "stop", e));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Health of every active extension. A panicking check is reported as
    /// unhealthy.
    pub async fn health_check(&self) -> BTreeMap<String, HealthCheck> {
        let active: Vec<(String, Instance)> = {
            let inner = self.inner.read();
            inner
                .order
                .iter()
                .filter_map(|name| {
                    let entry = inner.entries.get(name)?;
                    if entry.state != ExtensionState::Active {
                        return None;
                    }
                    entry.instance.clone().map(|instance| (name.clone(), instance))
                })
                .collect()
        };

        let mut report = BTreeMap::new();
        for (name, instance) in active {
            let check = AssertUnwindSafe(async {
                let guard = instance.lock().await;
                guard.health_check().await
            })
            .catch_unwind()
            .await
            .unwrap_or_else(|_| HealthCheck::unhealthy(format!("health check of {} panicked", name)));
            report.insert(name, check);
        }
        report
    }

    /// Exclude a registered extension from initialization.
    pub fn disable_extension(&self, name: &str) -> Result<(), ExtensionError> {
        {
            let inner = self.inner.read();
            if inner.entry(name)?.metadata.required {
                return Err(ExtensionError::Required(name.to_string()));
            }
        }
        self.transition(name, ExtensionState::Disabled)?;
        info!("Extension disabled: {}", name);
        Ok(())
    }

    /// Make a disabled extension eligible for initialization again.
    pub fn enable_extension(&self, name: &str) -> Result<(), ExtensionError> {
        self.transition(name, ExtensionState::Registered)?;
        info!("Extension enabled: {}", name);
        Ok(())
    }

    pub fn state(&self, name: &str) -> Option<ExtensionState> {
        self.inner.read().entries.get(name).map(|entry| entry.state)
    }

    pub fn metadata(&self, name: &str) -> Option<ExtensionMetadata> {
        self.inner
            .read()
            .entries
            .get(name)
            .map(|entry| entry.metadata.clone())
    }

    /// Registered extensions in registration order.
    pub fn list(&self) -> Vec<ExtensionInfo> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|name| inner.entries.get(name))
            .map(|entry| ExtensionInfo {
                metadata: entry.metadata.clone(),
                state: entry.state,
            })
            .collect()
    }

    /// Names of registered extensions that declare `name` as a dependency.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .dependents
            .get(name)
            .map(|names| {
                names
                    .iter()
                    .filter(|n| inner.entries.contains_key(*n))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Order used by the last initialization; stop runs it backwards.
    pub fn lifecycle_order(&self) -> Vec<String> {
        self.inner.read().lifecycle_order.clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check dependencies and compute the lifecycle order of every enabled
    /// extension.
    fn plan(&self) -> Result<Vec<String>, ExtensionError> {
        let mut inner = self.inner.write();

        let enabled: Vec<String> = inner
            .order
            .iter()
            .filter(|name| {
                inner
                    .entries
                    .get(*name)
                    .is_some_and(|entry| entry.state != ExtensionState::Disabled)
            })
            .cloned()
            .collect();

        for name in &enabled {
            let entry = inner.entry(name)?;
            for dependency in &entry.metadata.dependencies {
                match inner.entries.get(dependency) {
                    None => {
                        return Err(ExtensionError::MissingDependency {
                            extension: name.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                    Some(dep) if dep.state == ExtensionState::Disabled => {
                        return Err(ExtensionError::DisabledDependency {
                            extension: name.clone(),
                            dependency: dependency.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        let order = {
            let entries = &inner.entries;
            dependency_order(&enabled, |name| {
                entries
                    .get(name)
                    .map(|entry| entry.metadata.dependencies.as_slice())
            })?
        };
        inner.lifecycle_order = order.clone();
        Ok(order)
    }

    /// Move `name` to `initializing` if it needs a fresh instance, returning
    /// what is needed to build it.
    fn prepare_initialization(
        &self,
        name: &str,
    ) -> Result<Option<(Arc<dyn ExtensionFactory>, Value)>, ExtensionError> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(name)?;
        if !entry.state.needs_initialization() {
            debug!("Skipping {} in state {}", name, entry.state);
            return Ok(None);
        }
        entry.state = ExtensionState::Initializing;
        entry.instance = None;
        entry.cancellation = None;
        Ok(Some((entry.factory.clone(), entry.config.clone())))
    }

    fn transition(&self, name: &str, to: ExtensionState) -> Result<(), ExtensionError> {
        let mut inner = self.inner.write();
        let entry = inner.entry_mut(name)?;
        if !entry.state.can_transition_to(to) {
            return Err(ExtensionError::InvalidTransition {
                extension: name.to_string(),
                from: entry.state,
                to,
            });
        }
        debug!("Extension {}: {} -> {}", name, entry.state, to);
        entry.state = to;
        Ok(())
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn check_required_keys(metadata: &ExtensionMetadata, config: &Value) -> Result<(), ExtensionError> {
    let missing: Vec<&str> = metadata
        .required_config_keys()
        .into_iter()
        .filter(|key| config.get(*key).is_none())
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(ExtensionError::Configuration {
        extension: metadata.name.clone(),
        message: format!("missing required keys: {}", missing.join(", ")),
    })
}

fn lifecycle_error(name: &str, phase: &'static str, source: ExtensionError) -> ExtensionError {
    ExtensionError::Lifecycle {
        extension: name.to_string(),
        phase,
        source: Box::new(source),
    }
}

#[cfg(test)]
#[path = "extension_registry_tests.rs"]
mod tests;
