//! Extension metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::Version;

/// Immutable description of an extension.
///
/// `name` is the registry key. `dependencies` keeps declaration order, which
/// the registry uses as the tie-break when computing the start order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionMetadata {
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl ExtensionMetadata {
    /// Create new metadata with no dependencies.
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            description: String::new(),
            dependencies: Vec::new(),
            required: false,
            config_schema: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Declare a dependency. Duplicates are ignored.
    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.dependencies.contains(&name) {
            self.dependencies.push(name);
        }
        self
    }

    pub fn with_dependencies<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, |meta, name| meta.with_dependency(name))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_config_schema(mut self, schema: serde_json::Value) -> Self {
        self.config_schema = Some(schema);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Keys listed under `"required"` in the config schema.
    pub fn required_config_keys(&self) -> Vec<&str> {
        self.config_schema
            .as_ref()
            .and_then(|schema| schema.get("required"))
            .and_then(|required| required.as_array())
            .map(|keys| keys.iter().filter_map(|k| k.as_str()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "metadata_tests.rs"]
mod tests;
