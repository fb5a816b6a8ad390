use super::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

struct Database {
    url: String,
    initialized: AtomicBool,
}

#[async_trait]
impl Service for Database {
    async fn initialize(&self) -> Result<(), ServiceError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Database {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            initialized: AtomicBool::new(false),
        }
    }
}

struct Cache {
    db: Arc<Database>,
}

#[async_trait]
impl Service for Cache {}

struct Api {
    cache: Arc<Cache>,
}

#[async_trait]
impl Service for Api {}

struct Unregistered;

#[async_trait]
impl Service for Unregistered {}

#[derive(Clone)]
struct RequestContext {
    id: usize,
}

#[async_trait]
impl Service for RequestContext {}

/// Records hook invocations into a shared log.
struct Recorder {
    name: &'static str,
    log: Arc<parking_lot::Mutex<Vec<String>>>,
    fail_stop: bool,
}

#[async_trait]
impl Service for Recorder {
    async fn start(&self) -> Result<(), ServiceError> {
        self.log.lock().push(format!("start:{}", self.name));
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.log.lock().push(format!("stop:{}", self.name));
        if self.fail_stop {
            return Err(ServiceError::Custom("stop failed".to_string()));
        }
        Ok(())
    }
}

struct OtherRecorder(Recorder);

#[async_trait]
impl Service for OtherRecorder {
    async fn start(&self) -> Result<(), ServiceError> {
        self.0.start().await
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.0.stop().await
    }
}

struct PanickyHealth;

#[async_trait]
impl Service for PanickyHealth {
    async fn health_check(&self) -> HealthCheck {
        panic!("health probe exploded");
    }
}

fn cache_descriptor() -> ServiceDescriptor<Cache> {
    ServiceDescriptor::factory(|deps: Dependencies| async move {
        Ok(Cache {
            db: deps.get::<Database>()?,
        })
    })
    .depends_on::<Database>()
}

#[test]
fn test_container_creation() {
    let container = ServiceContainer::new();
    assert!(container.is_empty());
    assert!(container.registered_services().is_empty());
}

#[tokio::test]
async fn test_register_instance_and_get() {
    let container = ServiceContainer::new();
    container
        .register_instance(Database::new("sqlite://memory"))
        .unwrap();

    let db = container.get::<Database>().await.unwrap();
    assert_eq!(db.url, "sqlite://memory");
    assert!(container.contains::<Database>());
    assert!(container.is_constructed::<Database>());

    let again = container.get::<Database>().await.unwrap();
    assert!(Arc::ptr_eq(&db, &again));
}

#[test]
fn test_register_requires_exactly_one_source() {
    let container = ServiceContainer::new();

    let neither: ServiceDescriptor<Database> = ServiceDescriptor::new();
    let err = container.register(neither).unwrap_err();
    assert!(matches!(err, ServiceError::InvalidRegistration { .. }));

    let both = ServiceDescriptor::instance(Database::new("a"))
        .with_factory(|_deps: Dependencies| async { Ok(Database::new("b")) });
    let err = container.register(both).unwrap_err();
    assert!(err.to_string().contains("both"));

    assert!(container.is_empty());
}

#[test]
fn test_non_singleton_instance_rejected() {
    let container = ServiceContainer::new();
    let descriptor = ServiceDescriptor::instance(Database::new("a")).singleton(false);
    let err = container.register(descriptor).unwrap_err();
    assert!(matches!(err, ServiceError::InvalidRegistration { .. }));
}

#[test]
fn test_duplicate_registration_rejected() {
    let container = ServiceContainer::new();
    container.register_instance(Database::new("a")).unwrap();
    let err = container.register_instance(Database::new("b")).unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyRegistered(_)));
    assert_eq!(container.len(), 1);
}

#[tokio::test]
async fn test_get_unregistered_service() {
    let container = ServiceContainer::new();
    let err = container.get::<Unregistered>().await.err().unwrap();
    assert!(matches!(err, ServiceError::NotFound(name) if name.ends_with("Unregistered")));
}

#[tokio::test]
async fn test_factory_injects_declared_dependencies() {
    let container = ServiceContainer::new();
    container.register(cache_descriptor()).unwrap();
    container
        .register(
            ServiceDescriptor::factory(|deps: Dependencies| async move {
                Ok(Api {
                    cache: deps.get::<Cache>()?,
                })
            })
            .depends_on::<Cache>(),
        )
        .unwrap();
    container
        .register(ServiceDescriptor::factory(|_deps: Dependencies| async {
            Ok(Database::new("postgres://db"))
        }))
        .unwrap();

    assert!(!container.is_constructed::<Cache>());

    let api = container.get::<Api>().await.unwrap();
    assert_eq!(api.cache.db.url, "postgres://db");
    assert!(api.cache.db.initialized.load(Ordering::SeqCst));

    // Dependencies were published as singletons along the way.
    let db = container.get::<Database>().await.unwrap();
    assert!(Arc::ptr_eq(&db, &api.cache.db));
    assert!(container.is_constructed::<Cache>());
}

#[tokio::test]
async fn test_missing_dependency_is_dependency_error() {
    let container = ServiceContainer::new();
    container.register(cache_descriptor()).unwrap();

    let err = container.get::<Cache>().await.err().unwrap();
    assert!(matches!(err, ServiceError::Dependency { .. }));
    assert!(matches!(err.root_cause(), ServiceError::NotFound(name) if name.ends_with("Database")));
    assert!(!container.is_constructed::<Cache>());
}

#[tokio::test]
async fn test_undeclared_dependency_lookup_fails() {
    let container = ServiceContainer::new();
    container.register_instance(Database::new("a")).unwrap();
    container
        .register(ServiceDescriptor::factory(|deps: Dependencies| async move {
            Ok(Cache {
                db: deps.get::<Database>()?,
            })
        }))
        .unwrap();

    let err = container.get::<Cache>().await.err().unwrap();
    assert!(err.root_cause().to_string().contains("not a declared dependency"));
}

#[tokio::test]
async fn test_concurrent_get_constructs_once() {
    let container = Arc::new(ServiceContainer::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    container
        .register(ServiceDescriptor::factory(move |_deps: Dependencies| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Database::new("slow"))
            }
        }))
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let container = container.clone();
        handles.push(tokio::spawn(async move {
            container.get::<Database>().await.unwrap()
        }));
    }

    let mut instances = Vec::new();
    for handle in handles {
        instances.push(handle.await.unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
}

#[tokio::test]
async fn test_failed_construction_can_be_retried() {
    let container = ServiceContainer::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    container
        .register(ServiceDescriptor::factory(move |_deps: Dependencies| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(ServiceError::Custom("not yet".to_string()))
                } else {
                    Ok(Database::new("second"))
                }
            }
        }))
        .unwrap();

    assert!(container.get::<Database>().await.is_err());
    let db = container.get::<Database>().await.unwrap();
    assert_eq!(db.url, "second");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_transient_factory_builds_every_time() {
    let container = ServiceContainer::new();
    let next_id = Arc::new(AtomicUsize::new(0));
    let ids = next_id.clone();

    container
        .register(
            ServiceDescriptor::factory(move |_deps: Dependencies| {
                let id = ids.fetch_add(1, Ordering::SeqCst);
                async move { Ok(RequestContext { id }) }
            })
            .singleton(false),
        )
        .unwrap();

    let first = container.get::<RequestContext>().await.unwrap();
    let second = container.get::<RequestContext>().await.unwrap();
    assert_eq!(first.id, 0);
    assert_eq!(second.id, 1);
    assert!(!container.is_constructed::<RequestContext>());
}

#[tokio::test]
async fn test_prototype_returns_fresh_clones() {
    let container = ServiceContainer::new();
    container
        .register(ServiceDescriptor::prototype(RequestContext { id: 7 }))
        .unwrap();

    let first = container.get::<RequestContext>().await.unwrap();
    let second = container.get::<RequestContext>().await.unwrap();
    assert_eq!(first.id, 7);
    assert_eq!(second.id, 7);
    assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_circular_dependency_detected() {
    struct Left;
    struct Right;

    #[async_trait]
    impl Service for Left {}
    #[async_trait]
    impl Service for Right {}

    let container = ServiceContainer::new();
    container
        .register(
            ServiceDescriptor::factory(|deps: Dependencies| async move {
                deps.get::<Right>()?;
                Ok(Left)
            })
            .depends_on::<Right>(),
        )
        .unwrap();
    container
        .register(
            ServiceDescriptor::factory(|deps: Dependencies| async move {
                deps.get::<Left>()?;
                Ok(Right)
            })
            .depends_on::<Left>(),
        )
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), container.get::<Left>())
        .await
        .expect("circular resolution must not hang");
    let err = result.err().unwrap();
    match err.root_cause() {
        ServiceError::Circular { path } => {
            assert_eq!(path.len(), 3);
            assert!(path[0].ends_with("Left"));
            assert!(path[1].ends_with("Right"));
            assert!(path[2].ends_with("Left"));
        }
        other => panic!("expected circular error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_start_stop_order() {
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let container = ServiceContainer::new();
    container
        .register_instance(Recorder {
            name: "first",
            log: log.clone(),
            fail_stop: false,
        })
        .unwrap();
    container
        .register_instance(OtherRecorder(Recorder {
            name: "second",
            log: log.clone(),
            fail_stop: false,
        }))
        .unwrap();

    container.start().await.unwrap();
    container.stop().await.unwrap();

    assert_eq!(
        *log.lock(),
        vec!["start:first", "start:second", "stop:second", "stop:first"]
    );
}

#[tokio::test]
async fn test_stop_attempts_all_services() {
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let container = ServiceContainer::new();
    container
        .register_instance(Recorder {
            name: "first",
            log: log.clone(),
            fail_stop: false,
        })
        .unwrap();
    container
        .register_instance(OtherRecorder(Recorder {
            name: "second",
            log: log.clone(),
            fail_stop: true,
        }))
        .unwrap();

    let err = container.stop().await.unwrap_err();
    assert!(matches!(err, ServiceError::Hook { hook: "stop", .. }));
    assert_eq!(*log.lock(), vec!["stop:second", "stop:first"]);
}

#[tokio::test]
async fn test_start_skips_unconstructed_factories() {
    let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let factory_log = log.clone();
    let container = ServiceContainer::new();
    container
        .register(ServiceDescriptor::factory(move |_deps: Dependencies| {
            let log = factory_log.clone();
            async move {
                Ok(Recorder {
                    name: "lazy",
                    log,
                    fail_stop: false,
                })
            }
        }))
        .unwrap();

    container.start().await.unwrap();
    assert!(log.lock().is_empty());

    container.get::<Recorder>().await.unwrap();
    container.stop().await.unwrap();
    assert_eq!(*log.lock(), vec!["stop:lazy"]);
}

#[tokio::test]
async fn test_health_check_isolates_panics() {
    let container = ServiceContainer::new();
    container.register_instance(Database::new("a")).unwrap();
    container.register_instance(PanickyHealth).unwrap();

    let report = container.health_check().await;
    assert_eq!(report.len(), 2);

    let (_, db) = report.iter().find(|(name, _)| name.ends_with("Database")).unwrap();
    assert!(db.is_healthy());

    let (_, panicky) = report
        .iter()
        .find(|(name, _)| name.ends_with("PanickyHealth"))
        .unwrap();
    assert!(!panicky.is_healthy());
}
