//! Service protocol: objects managed by the service container.

use std::any::TypeId;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::health::HealthCheck;

/// Lifecycle hooks for a container-managed service.
///
/// Every hook is optional. `initialize` runs once right after construction;
/// `start` and `stop` run when the owning container starts or stops.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    async fn initialize(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn start(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn health_check(&self) -> HealthCheck {
        HealthCheck::healthy()
    }
}

/// Type identifier of a service.
///
/// Equality and hashing use the `TypeId` only; the name is kept for logs and
/// error messages.
#[derive(Debug, Clone, Copy)]
pub struct ServiceKey {
    id: TypeId,
    name: &'static str,
}

impl ServiceKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Database;
    struct Cache;

    #[async_trait]
    impl Service for Database {}

    #[test]
    fn test_service_key_identity() {
        assert_eq!(ServiceKey::of::<Database>(), ServiceKey::of::<Database>());
        assert_ne!(ServiceKey::of::<Database>(), ServiceKey::of::<Cache>());

        let keys: HashSet<_> = [ServiceKey::of::<Database>(), ServiceKey::of::<Database>()]
            .into_iter()
            .collect();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_service_key_name() {
        let key = ServiceKey::of::<Database>();
        assert!(key.name().ends_with("Database"));
        assert_eq!(key.to_string(), key.name());
    }

    #[tokio::test]
    async fn test_default_hooks() {
        let db = Database;
        assert!(db.initialize().await.is_ok());
        assert!(db.start().await.is_ok());
        assert!(db.stop().await.is_ok());
        assert!(db.health_check().await.is_healthy());
    }
}
