//! CLI definitions for Keel.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Keel CLI.
#[derive(Parser)]
#[command(name = "keel")]
#[command(about = "Application runtime kernel")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: ~/.keel/config.toml if present)
    #[arg(short, long, global = true, env = "KEEL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the kernel in the foreground (default)
    Run,

    /// Start, print a health report and stop
    Health,

    /// Inspect or edit persisted state
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum StateAction {
    /// Print one entry as JSON
    Get {
        key: String,
    },

    /// Write an entry; VALUE is parsed as JSON, falling back to a string
    Set {
        key: String,
        value: String,
    },

    /// Remove an entry
    Delete {
        key: String,
    },

    /// List all entries
    List,
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Check the configuration and report problems
    Validate,

    /// Print the effective configuration
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command() {
        let cli = Cli::try_parse_from(["keel"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_state_set() {
        let cli = Cli::try_parse_from(["keel", "--config", "k.toml", "state", "set", "x", "42"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("k.toml")));
        match cli.command {
            Some(Commands::State {
                action: StateAction::Set { key, value },
            }) => {
                assert_eq!(key, "x");
                assert_eq!(value, "42");
            }
            _ => panic!("expected state set"),
        }
    }

    #[test]
    fn test_config_validate() {
        let cli = Cli::try_parse_from(["keel", "config", "validate"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Validate
            })
        ));
    }
}
