//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub kernel: KernelConfig,

    #[serde(default)]
    pub event_bus: EventBusConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub extensions: ExtensionsConfig,
}

impl Config {
    /// Configuration table for one extension, `Null` when absent.
    pub fn extension_config(&self, name: &str) -> serde_json::Value {
        self.extensions
            .config
            .get(name)
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Application-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Instance name, used in logs and as the event source of kernel events.
    #[serde(default = "default_name")]
    pub name: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
        }
    }
}

fn default_name() -> String {
    "keel".to_string()
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    /// Deliver events that are still queued when the bus is stopped.
    #[serde(default = "default_true")]
    pub drain_on_stop: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            drain_on_stop: true,
        }
    }
}

/// State manager configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// Write the whole state map to `path` after every committed change.
    #[serde(default)]
    pub persistence: bool,

    /// Location of the persisted state document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StateConfig {
    /// Persistence path if persistence is enabled, falling back to the
    /// default location under the data directory.
    pub fn persistence_path(&self) -> Option<PathBuf> {
        if !self.persistence {
            return None;
        }
        Some(self.path.clone().unwrap_or_else(default_state_path))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines on the console instead of text.
    #[serde(default)]
    pub json: bool,

    /// Also write daily-rotated log files.
    #[serde(default = "default_true")]
    pub file: bool,

    /// Directory for log files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            file: true,
            directory: None,
        }
    }
}

impl LoggingConfig {
    pub fn log_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| data_dir().join("logs"))
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Extension configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtensionsConfig {
    /// Extensions that are registered but not initialized.
    #[serde(default)]
    pub disabled: Vec<String>,

    /// Per-extension configuration tables, keyed by extension name.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// The `~/.keel` data directory.
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".keel"))
        .unwrap_or_else(|| PathBuf::from(".keel"))
}

fn default_state_path() -> PathBuf {
    data_dir().join("state.json")
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
