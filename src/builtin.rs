//! Extensions shipped with the `keel` binary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use keel_core::{Application, EventBus, Extension, ExtensionContext, KernelError, SubscriptionId};
use keel_protocols::{
    Event, ExtensionError, ExtensionMetadata, HealthCheck, Metadata, Version, handler_fn,
};

pub const HEARTBEAT: &str = "heartbeat";
pub const EVENT_LOG: &str = "event_log";

/// Register every built-in extension on `app`.
pub fn register_builtins(app: &Application) -> Result<(), KernelError> {
    app.register_extension(HEARTBEAT, HeartbeatExtension::create)?;
    app.register_extension(EVENT_LOG, EventLogExtension::create)?;
    Ok(())
}

fn version() -> Version {
    Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|| Version::new(0, 1, 0))
}

// ============================================================================
// Heartbeat
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct HeartbeatSettings {
    interval_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

/// Publishes a `heartbeat` event every interval and records the latest beat
/// under `heartbeat.count` / `heartbeat.last`.
pub struct HeartbeatExtension {
    metadata: ExtensionMetadata,
    settings: HeartbeatSettings,
    context: Option<ExtensionContext>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatExtension {
    pub fn create(config: &Value) -> Result<Box<dyn Extension>, ExtensionError> {
        let settings = if config.is_null() {
            HeartbeatSettings::default()
        } else {
            serde_json::from_value(config.clone()).map_err(|e| ExtensionError::Configuration {
                extension: HEARTBEAT.to_string(),
                message: e.to_string(),
            })?
        };
        Ok(Box::new(Self {
            metadata: ExtensionMetadata::new(HEARTBEAT, version())
                .with_description("Periodic liveness events"),
            settings,
            context: None,
            task: None,
        }))
    }
}

async fn beat(ctx: &ExtensionContext, count: u64) -> Result<(), KernelError> {
    let state = ctx.state();
    let tx = state.begin_transaction();
    state.set("heartbeat.count", count, Some(&tx)).await?;
    state
        .set("heartbeat.last", Utc::now().to_rfc3339(), Some(&tx))
        .await?;
    state.commit_transaction(&tx).await?;

    let mut data = Metadata::new();
    data.insert("count".to_string(), json!(count));
    ctx.publish(HEARTBEAT, Some(data));
    Ok(())
}

#[async_trait]
impl Extension for HeartbeatExtension {
    fn metadata(&self) -> &ExtensionMetadata {
        &self.metadata
    }

    fn validate_config(&self, _config: &Value) -> Result<(), ExtensionError> {
        if self.settings.interval_ms == 0 {
            return Err(ExtensionError::Configuration {
                extension: HEARTBEAT.to_string(),
                message: "interval_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    async fn initialize(&mut self, ctx: ExtensionContext) -> Result<(), ExtensionError> {
        self.context = Some(ctx);
        Ok(())
    }

    async fn start(&mut self) -> Result<(), ExtensionError> {
        let ctx = self
            .context
            .clone()
            .ok_or_else(|| ExtensionError::Custom("heartbeat started before initialize".into()))?;
        let period = Duration::from_millis(self.settings.interval_ms);
        info!("Heartbeat every {:?}", period);

        self.task = Some(tokio::spawn(async move {
            let token = ctx.cancellation_token().clone();
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut count = 0u64;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        count += 1;
                        if let Err(e) = beat(&ctx, count).await {
                            warn!("Heartbeat {} failed: {}", count, e);
                        }
                    }
                }
            }
            debug!("Heartbeat stopped after {} beats", count);
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ExtensionError> {
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| ExtensionError::ShutdownFailed(e.to_string()))?;
        }
        Ok(())
    }

    async fn health_check(&self) -> HealthCheck {
        match &self.task {
            Some(task) if task.is_finished() => HealthCheck::unhealthy("heartbeat task exited"),
            Some(_) => HealthCheck::healthy(),
            None => HealthCheck::degraded("not started"),
        }
    }
}

// ============================================================================
// Event log
// ============================================================================

/// Logs every event at debug level.
pub struct EventLogExtension {
    metadata: ExtensionMetadata,
    subscription: Option<(Arc<EventBus>, SubscriptionId)>,
}

impl EventLogExtension {
    pub fn create(_config: &Value) -> Result<Box<dyn Extension>, ExtensionError> {
        Ok(Box::new(Self {
            metadata: ExtensionMetadata::new(EVENT_LOG, version())
                .with_description("Debug log of every published event"),
            subscription: None,
        }))
    }
}

#[async_trait]
impl Extension for EventLogExtension {
    fn metadata(&self) -> &ExtensionMetadata {
        &self.metadata
    }

    async fn initialize(&mut self, ctx: ExtensionContext) -> Result<(), ExtensionError> {
        let events = ctx.events().clone();
        let id = events.subscribe(
            "*",
            handler_fn(|event: Event| async move {
                debug!(
                    event_type = %event.event_type,
                    source = %event.source,
                    data = ?event.data,
                    "event"
                );
                Ok(())
            }),
        );
        self.subscription = Some((events, id));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ExtensionError> {
        if let Some((events, id)) = self.subscription.take() {
            events.unsubscribe(id);
        }
        Ok(())
    }
}
