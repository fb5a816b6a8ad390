//! Service container errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Service not found: {0}")]
    NotFound(String),

    #[error("Service already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Invalid registration for {service}: {reason}")]
    InvalidRegistration { service: String, reason: String },

    #[error("Failed to resolve dependencies of {service}")]
    Dependency {
        service: String,
        #[source]
        source: Box<ServiceError>,
    },

    #[error("Circular service dependency: {}", .path.join(" -> "))]
    Circular { path: Vec<String> },

    #[error("Service {service} failed during {hook}: {message}")]
    Hook {
        service: String,
        hook: &'static str,
        message: String,
    },

    #[error("{0}")]
    Custom(String),
}

impl ServiceError {
    /// Walk the `Dependency` chain down to the error that started it.
    pub fn root_cause(&self) -> &ServiceError {
        let mut current = self;
        while let ServiceError::Dependency { source, .. } = current {
            current = source.as_ref();
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = ServiceError::NotFound("app::Database".to_string());
        let display = err.to_string();
        assert!(display.contains("not found"));
        assert!(display.contains("app::Database"));
    }

    #[test]
    fn test_circular_error_lists_path() {
        let err = ServiceError::Circular {
            path: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert_eq!(err.to_string(), "Circular service dependency: A -> B -> A");
    }

    #[test]
    fn test_dependency_error_source() {
        let err = ServiceError::Dependency {
            service: "Api".to_string(),
            source: Box::new(ServiceError::NotFound("Db".to_string())),
        };
        assert!(err.to_string().contains("Api"));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("Db"));
    }

    #[test]
    fn test_root_cause_unwraps_nested_dependencies() {
        let err = ServiceError::Dependency {
            service: "Api".to_string(),
            source: Box::new(ServiceError::Dependency {
                service: "Cache".to_string(),
                source: Box::new(ServiceError::NotFound("Db".to_string())),
            }),
        };
        assert!(matches!(err.root_cause(), ServiceError::NotFound(name) if name == "Db"));
    }

    #[test]
    fn test_hook_error() {
        let err = ServiceError::Hook {
            service: "Cache".to_string(),
            hook: "start",
            message: "port in use".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("start"));
        assert!(display.contains("port in use"));
    }
}
