//! Event protocol: what the event bus carries and who receives it.

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventError;
use crate::types::Metadata;

/// Topic that matches every event.
pub const WILDCARD: &str = "*";

/// A published notification. Immutable once handed to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            data: None,
            metadata: None,
        }
    }

    pub fn with_data(mut self, data: Metadata) -> Self {
        self.data = Some(data);
        self
    }

    /// Add one entry to the data map, creating it if needed.
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.get_or_insert_with(Metadata::new).insert(key.into(), value);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Look up a data field.
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.as_ref().and_then(|data| data.get(key))
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every event.
    Wildcard,
    /// Events whose type equals the string exactly.
    Exact(String),
}

impl Topic {
    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            Topic::Wildcard => true,
            Topic::Exact(topic) => topic == event_type,
        }
    }
}

impl From<&str> for Topic {
    fn from(topic: &str) -> Self {
        if topic == WILDCARD {
            Topic::Wildcard
        } else {
            Topic::Exact(topic.to_string())
        }
    }
}

impl From<String> for Topic {
    fn from(topic: String) -> Self {
        if topic == WILDCARD {
            Topic::Wildcard
        } else {
            Topic::Exact(topic)
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Wildcard => f.write_str(WILDCARD),
            Topic::Exact(topic) => f.write_str(topic),
        }
    }
}

/// Receiver side of a subscription.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), EventError>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F>(F);

/// Wrap `f` so it can be passed to `EventBus::subscribe`.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EventError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EventError>> + Send + 'static,
{
    async fn handle(&self, event: &Event) -> Result<(), EventError> {
        (self.0)(event.clone()).await
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
