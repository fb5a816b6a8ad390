//! Event bus errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event handler failed: {0}")]
    Handler(String),

    #[error("Event bus is already running")]
    AlreadyRunning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error() {
        let err = EventError::Handler("boom".to_string());
        assert_eq!(err.to_string(), "Event handler failed: boom");
    }

    #[test]
    fn test_already_running_error() {
        assert!(EventError::AlreadyRunning.to_string().contains("already running"));
    }
}
