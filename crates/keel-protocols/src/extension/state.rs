//! Extension lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a registered extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionState {
    /// Not known to any registry.
    Unregistered,
    /// Registered; no instance exists yet.
    Registered,
    /// Instance constructed and `initialize` has run (or is running).
    Initializing,
    /// Started and serving.
    Active,
    /// A lifecycle hook failed.
    Error,
    /// Excluded from initialization until enabled again.
    Disabled,
    /// `stop` is running.
    ShuttingDown,
    /// Stopped cleanly.
    Shutdown,
}

impl ExtensionState {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: ExtensionState) -> bool {
        use ExtensionState::*;
        matches!(
            (self, next),
            (Unregistered, Registered)
                | (Registered, Initializing)
                | (Registered, Disabled)
                | (Disabled, Registered)
                | (Initializing, Active)
                | (Initializing, Error)
                | (Active, ShuttingDown)
                | (Active, Error)
                | (ShuttingDown, Shutdown)
                | (ShuttingDown, Error)
                | (Shutdown, Initializing)
                | (Error, Initializing)
        )
    }

    /// States from which `initialize_extensions` builds a fresh instance.
    pub fn needs_initialization(self) -> bool {
        matches!(
            self,
            ExtensionState::Registered | ExtensionState::Shutdown | ExtensionState::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExtensionState::Unregistered => "unregistered",
            ExtensionState::Registered => "registered",
            ExtensionState::Initializing => "initializing",
            ExtensionState::Active => "active",
            ExtensionState::Error => "error",
            ExtensionState::Disabled => "disabled",
            ExtensionState::ShuttingDown => "shutting_down",
            ExtensionState::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExtensionState::*;

    const ALL: [ExtensionState; 8] = [
        Unregistered,
        Registered,
        Initializing,
        Active,
        Error,
        Disabled,
        ShuttingDown,
        Shutdown,
    ];

    #[test]
    fn test_happy_path_transitions() {
        let path = [Unregistered, Registered, Initializing, Active, ShuttingDown, Shutdown];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_error_reachable_only_from_running_phases() {
        let sources: Vec<_> = ALL.iter().filter(|s| s.can_transition_to(Error)).collect();
        assert_eq!(sources, vec![&Initializing, &Active, &ShuttingDown]);
    }

    #[test]
    fn test_no_backward_transitions() {
        assert!(!Active.can_transition_to(Initializing));
        assert!(!Active.can_transition_to(Registered));
        assert!(!Shutdown.can_transition_to(Active));
        assert!(!Registered.can_transition_to(Active));
        assert!(!Initializing.can_transition_to(Registered));
    }

    #[test]
    fn test_reinitialization_allowed() {
        assert!(Shutdown.can_transition_to(Initializing));
        assert!(Error.can_transition_to(Initializing));
        assert!(Shutdown.needs_initialization());
        assert!(!Active.needs_initialization());
        assert!(!Disabled.needs_initialization());
    }

    #[test]
    fn test_display_and_serde_agree() {
        for state in ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
        }
    }
}
