//! State manager errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    #[error("Failed to persist state to {path:?}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_transaction_error() {
        let err = StateError::UnknownTransaction("tx-1".to_string());
        assert!(err.to_string().contains("tx-1"));
    }

    #[test]
    fn test_persistence_error() {
        let err = StateError::Persistence {
            path: PathBuf::from("/read-only/state.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let display = err.to_string();
        assert!(display.contains("state.json"));
        assert!(display.contains("denied"));
    }

    #[test]
    fn test_serialization_error_from() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = StateError::from(json_err);
        assert!(err.to_string().contains("serialization"));
    }
}
