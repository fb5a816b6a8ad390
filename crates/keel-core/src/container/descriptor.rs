//! Service registration descriptors.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use keel_protocols::error::ServiceError;
use keel_protocols::service::{Service, ServiceKey};

pub(crate) type TypedFactory<T> =
    Arc<dyn Fn(Dependencies) -> BoxFuture<'static, Result<T, ServiceError>> + Send + Sync>;

/// Dependencies resolved for a factory, keyed by the types it declared.
pub struct Dependencies {
    resolved: HashMap<ServiceKey, Arc<dyn Any + Send + Sync>>,
}

impl Dependencies {
    pub(crate) fn new(resolved: HashMap<ServiceKey, Arc<dyn Any + Send + Sync>>) -> Self {
        Self { resolved }
    }

    /// Fetch a declared dependency.
    ///
    /// Asking for a type that was not passed to
    /// [`ServiceDescriptor::depends_on`] is a `NotFound` error.
    pub fn get<D: Service>(&self) -> Result<Arc<D>, ServiceError> {
        let key = ServiceKey::of::<D>();
        self.resolved
            .get(&key)
            .cloned()
            .and_then(|value| value.downcast::<D>().ok())
            .ok_or_else(|| {
                ServiceError::NotFound(format!("{} (not a declared dependency)", key.name()))
            })
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

pub(crate) enum Implementation<T> {
    Instance(Arc<T>),
    Prototype { template: Arc<T>, make: fn(&T) -> T },
}

/// Describes how the container obtains an instance of `T`.
///
/// Exactly one of an implementation (instance or prototype) and a factory
/// must be supplied; [`ServiceContainer::register`] rejects anything else.
///
/// [`ServiceContainer::register`]: crate::ServiceContainer::register
pub struct ServiceDescriptor<T: Service> {
    pub(crate) implementation: Option<Implementation<T>>,
    pub(crate) factory: Option<TypedFactory<T>>,
    pub(crate) dependencies: Vec<ServiceKey>,
    pub(crate) singleton: bool,
}

impl<T: Service> ServiceDescriptor<T> {
    /// An empty descriptor. Singleton by default.
    pub fn new() -> Self {
        Self {
            implementation: None,
            factory: None,
            dependencies: Vec::new(),
            singleton: true,
        }
    }

    /// Shorthand for a ready-made singleton.
    pub fn instance(value: T) -> Self {
        Self::new().with_instance(value)
    }

    /// Shorthand for a lazily constructed service.
    pub fn factory<F, Fut>(factory: F) -> Self
    where
        F: Fn(Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
    {
        Self::new().with_factory(factory)
    }

    /// Shorthand for a non-singleton template; every `get` returns a clone.
    pub fn prototype(template: T) -> Self
    where
        T: Clone,
    {
        Self::new().with_prototype(template)
    }

    pub fn with_instance(mut self, value: T) -> Self {
        self.implementation = Some(Implementation::Instance(Arc::new(value)));
        self
    }

    pub fn with_prototype(mut self, template: T) -> Self
    where
        T: Clone,
    {
        self.implementation = Some(Implementation::Prototype {
            template: Arc::new(template),
            make: T::clone,
        });
        self.singleton = false;
        self
    }

    pub fn with_factory<F, Fut>(mut self, factory: F) -> Self
    where
        F: Fn(Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
    {
        self.factory = Some(Arc::new(move |deps| factory(deps).boxed()));
        self
    }

    /// Declare a dependency resolved before the factory runs.
    pub fn depends_on<D: Service>(mut self) -> Self {
        let key = ServiceKey::of::<D>();
        if !self.dependencies.contains(&key) {
            self.dependencies.push(key);
        }
        self
    }

    /// Whether factory output is cached. Factories with `false` build a
    /// fresh instance on every request.
    pub fn singleton(mut self, singleton: bool) -> Self {
        self.singleton = singleton;
        self
    }

    pub fn dependencies(&self) -> &[ServiceKey] {
        &self.dependencies
    }
}

impl<T: Service> Default for ServiceDescriptor<T> {
    fn default() -> Self {
        Self::new()
    }
}
