//! Service container: typed registry with lazy, at-most-once construction.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use keel_protocols::error::ServiceError;
use keel_protocols::health::HealthCheck;
use keel_protocols::service::{Service, ServiceKey};

use super::descriptor::{Dependencies, Implementation, ServiceDescriptor};

/// A constructed service, held both as `Any` (for downcasting) and as
/// `dyn Service` (for lifecycle hooks).
#[derive(Clone)]
struct ErasedService {
    value: Arc<dyn Any + Send + Sync>,
    hooks: Arc<dyn Service>,
}

impl ErasedService {
    fn new<T: Service>(value: Arc<T>) -> Self {
        Self {
            value: value.clone(),
            hooks: value,
        }
    }
}

type ErasedFactory =
    Arc<dyn Fn(Dependencies) -> BoxFuture<'static, Result<ErasedService, ServiceError>> + Send + Sync>;

enum Provider {
    Instance(ErasedService),
    Prototype {
        template: ErasedService,
        make: Arc<dyn Fn() -> ErasedService + Send + Sync>,
    },
    Factory {
        factory: ErasedFactory,
        dependencies: Vec<ServiceKey>,
        singleton: bool,
    },
}

enum Lookup {
    Ready(ErasedService),
    Construct {
        factory: ErasedFactory,
        dependencies: Vec<ServiceKey>,
        singleton: bool,
    },
}

#[derive(Default)]
struct Registrations {
    providers: HashMap<ServiceKey, Provider>,
    order: Vec<ServiceKey>,
}

/// Dependency-injection container.
///
/// Singletons built from factories are constructed at most once: the first
/// requester takes the per-type construction lock, concurrent requesters
/// wait on it and then find the published instance.
pub struct ServiceContainer {
    registrations: RwLock<Registrations>,
    singletons: DashMap<ServiceKey, ErasedService>,
    construction: DashMap<ServiceKey, Arc<Mutex<()>>>,
}

impl ServiceContainer {
    /// Create an empty container.
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(Registrations::default()),
            singletons: DashMap::new(),
            construction: DashMap::new(),
        }
    }

    /// Register a service.
    pub fn register<T: Service>(&self, descriptor: ServiceDescriptor<T>) -> Result<(), ServiceError> {
        let key = ServiceKey::of::<T>();
        let ServiceDescriptor {
            implementation,
            factory,
            dependencies,
            singleton,
        } = descriptor;

        let provider = match (implementation, factory) {
            (Some(_), Some(_)) => {
                return Err(invalid(key, "both an implementation and a factory were supplied"));
            }
            (None, None) => {
                return Err(invalid(key, "neither an implementation nor a factory was supplied"));
            }
            (Some(Implementation::Instance(_)), None) if !singleton => {
                return Err(invalid(
                    key,
                    "a shared instance cannot be non-singleton, register a prototype instead",
                ));
            }
            (Some(Implementation::Instance(value)), None) => {
                Provider::Instance(ErasedService::new(value))
            }
            (Some(Implementation::Prototype { template, make }), None) => {
                let source = template.clone();
                Provider::Prototype {
                    template: ErasedService::new(template),
                    make: Arc::new(move || ErasedService::new(Arc::new(make(&source)))),
                }
            }
            (None, Some(typed)) => {
                let factory: ErasedFactory = Arc::new(move |deps| {
                    let built = typed(deps);
                    async move { built.await.map(|value| ErasedService::new(Arc::new(value))) }
                        .boxed()
                });
                Provider::Factory {
                    factory,
                    dependencies,
                    singleton,
                }
            }
        };

        let mut registrations = self.registrations.write();
        if registrations.providers.contains_key(&key) {
            return Err(ServiceError::AlreadyRegistered(key.name().to_string()));
        }
        registrations.providers.insert(key, provider);
        registrations.order.push(key);
        debug!("Registered service: {}", key);
        Ok(())
    }

    /// Register a ready-made singleton.
    pub fn register_instance<T: Service>(&self, value: T) -> Result<(), ServiceError> {
        self.register(ServiceDescriptor::instance(value))
    }

    /// Resolve a service, constructing it (and its dependencies) if needed.
    pub async fn get<T: Service>(&self) -> Result<Arc<T>, ServiceError> {
        let key = ServiceKey::of::<T>();
        let service = self.resolve(key, Vec::new()).await?;
        service
            .value
            .downcast::<T>()
            .map_err(|_| ServiceError::Custom(format!("Type mismatch resolving {}", key)))
    }

    /// Whether a registration exists for `T`.
    pub fn contains<T: Service>(&self) -> bool {
        self.registrations
            .read()
            .providers
            .contains_key(&ServiceKey::of::<T>())
    }

    /// Whether `T` is available without running a factory.
    pub fn is_constructed<T: Service>(&self) -> bool {
        let key = ServiceKey::of::<T>();
        if self.singletons.contains_key(&key) {
            return true;
        }
        matches!(
            self.registrations.read().providers.get(&key),
            Some(Provider::Instance(_)) | Some(Provider::Prototype { .. })
        )
    }

    /// Type names of registered services, in registration order.
    pub fn registered_services(&self) -> Vec<&'static str> {
        self.registrations
            .read()
            .order
            .iter()
            .map(|key| key.name())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registrations.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every registered instance's `start` hook in registration order.
    pub async fn start(&self) -> Result<(), ServiceError> {
        let instances = self.instances();
        info!("Starting {} services", instances.len());
        for (key, service) in instances {
            service.hooks.start().await.map_err(|e| hook_error(key, "start", e))?;
        }
        Ok(())
    }

    /// Run every registered instance's `stop` hook in reverse registration
    /// order. All services are attempted; the first failure is returned.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let instances = self.instances();
        info!("Stopping {} services", instances.len());
        let mut first_error = None;
        for (key, service) in instances.into_iter().rev() {
            if let Err(e) = service.hooks.stop().await {
                warn!("Failed to stop service {}: {}", key, e);
                first_error.get_or_insert(hook_error(key, "stop", e));
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Health of every instantiated service. Panicking checks are reported
    /// as unhealthy.
    pub async fn health_check(&self) -> BTreeMap<String, HealthCheck> {
        let mut report = BTreeMap::new();
        for (key, service) in self.instances() {
            let check = AssertUnwindSafe(service.hooks.health_check())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| HealthCheck::unhealthy("health check panicked"));
            report.insert(key.name().to_string(), check);
        }
        report
    }

    /// Registered instances that exist right now, in registration order.
    fn instances(&self) -> Vec<(ServiceKey, ErasedService)> {
        let registrations = self.registrations.read();
        registrations
            .order
            .iter()
            .filter_map(|key| {
                let service = match registrations.providers.get(key)? {
                    Provider::Instance(service) => service.clone(),
                    Provider::Prototype { template, .. } => template.clone(),
                    Provider::Factory { .. } => self.cached(*key)?,
                };
                Some((*key, service))
            })
            .collect()
    }

    fn cached(&self, key: ServiceKey) -> Option<ErasedService> {
        self.singletons.get(&key).map(|entry| entry.value().clone())
    }

    fn lookup(&self, key: ServiceKey) -> Result<Lookup, ServiceError> {
        let registrations = self.registrations.read();
        match registrations.providers.get(&key) {
            None => Err(ServiceError::NotFound(key.name().to_string())),
            Some(Provider::Instance(service)) => Ok(Lookup::Ready(service.clone())),
            Some(Provider::Prototype { make, .. }) => Ok(Lookup::Ready(make())),
            Some(Provider::Factory {
                factory,
                dependencies,
                singleton,
            }) => Ok(Lookup::Construct {
                factory: factory.clone(),
                dependencies: dependencies.clone(),
                singleton: *singleton,
            }),
        }
    }

    fn construction_lock(&self, key: ServiceKey) -> Arc<Mutex<()>> {
        self.construction
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// `path` holds the types currently being constructed by this request,
    /// outermost first.
    fn resolve(
        &self,
        key: ServiceKey,
        path: Vec<ServiceKey>,
    ) -> BoxFuture<'_, Result<ErasedService, ServiceError>> {
        async move {
            if path.contains(&key) {
                let mut cycle: Vec<String> = path
                    .iter()
                    .skip_while(|k| **k != key)
                    .map(|k| k.name().to_string())
                    .collect();
                cycle.push(key.name().to_string());
                return Err(ServiceError::Circular { path: cycle });
            }

            if let Some(service) = self.cached(key) {
                return Ok(service);
            }

            let (factory, dependencies, singleton) = match self.lookup(key)? {
                Lookup::Ready(service) => return Ok(service),
                Lookup::Construct {
                    factory,
                    dependencies,
                    singleton,
                } => (factory, dependencies, singleton),
            };

            if !singleton {
                return self.construct(key, factory, dependencies, path).await;
            }

            let lock = self.construction_lock(key);
            let _in_flight = lock.lock().await;

            // Whoever held the lock before us may have published the instance.
            if let Some(service) = self.cached(key) {
                return Ok(service);
            }

            let service = self.construct(key, factory, dependencies, path).await?;
            self.singletons.insert(key, service.clone());
            Ok(service)
        }
        .boxed()
    }

    async fn construct(
        &self,
        key: ServiceKey,
        factory: ErasedFactory,
        dependencies: Vec<ServiceKey>,
        mut path: Vec<ServiceKey>,
    ) -> Result<ErasedService, ServiceError> {
        path.push(key);

        let mut resolved = HashMap::with_capacity(dependencies.len());
        for dependency in dependencies {
            let service = self
                .resolve(dependency, path.clone())
                .await
                .map_err(|e| dependency_error(key, e))?;
            resolved.insert(dependency, service.value);
        }

        debug!("Constructing service: {}", key);
        let service = factory(Dependencies::new(resolved))
            .await
            .map_err(|e| dependency_error(key, e))?;
        service
            .hooks
            .initialize()
            .await
            .map_err(|e| dependency_error(key, e))?;
        Ok(service)
    }
}

impl Default for ServiceContainer {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(key: ServiceKey, reason: &str) -> ServiceError {
    ServiceError::InvalidRegistration {
        service: key.name().to_string(),
        reason: reason.to_string(),
    }
}

fn dependency_error(key: ServiceKey, source: ServiceError) -> ServiceError {
    ServiceError::Dependency {
        service: key.name().to_string(),
        source: Box::new(source),
    }
}

fn hook_error(key: ServiceKey, hook: &'static str, source: ServiceError) -> ServiceError {
    ServiceError::Hook {
        service: key.name().to_string(),
        hook,
        message: source.to_string(),
    }
}

#[cfg(test)]
#[path = "service_container_tests.rs"]
mod tests;
