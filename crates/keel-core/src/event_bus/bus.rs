//! Event bus with a single FIFO delivery loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use keel_config::EventBusConfig;
use keel_protocols::error::EventError;
use keel_protocols::event::{Event, EventHandler, Topic};
use keel_protocols::health::HealthCheck;

use super::subscription::{EventFilter, Subscription, SubscriptionId, Subscriptions};

/// Counters describing bus activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventBusStats {
    pub published: u64,
    pub delivered: u64,
    pub handler_failures: u64,
    pub pending: usize,
    pub subscribers: usize,
}

/// State shared between the bus handle and its delivery loop.
struct Shared {
    subscriptions: RwLock<Subscriptions>,
    published: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
    /// Events published but not yet delivered or discarded.
    pending: AtomicUsize,
    idle: Notify,
    running: AtomicBool,
}

impl Shared {
    fn settle(&self, count: usize) {
        if count == 0 {
            return;
        }
        if self.pending.fetch_sub(count, Ordering::SeqCst) == count {
            self.idle.notify_waiters();
        }
    }

    async fn dispatch(&self, event: Event) {
        let subscribers = self.subscriptions.read().matching(&event.event_type);
        for subscription in subscribers {
            if !passes_filter(&subscription, &event) {
                continue;
            }
            let outcome = AssertUnwindSafe(subscription.handler.handle(&event))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Handler {} failed on event {}: {}",
                        subscription.id, event.event_type, e
                    );
                }
                Err(_) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "Handler {} panicked on event {}",
                        subscription.id, event.event_type
                    );
                }
            }
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        self.settle(1);
    }
}

fn passes_filter(subscription: &Subscription, event: &Event) -> bool {
    let Some(filter) = &subscription.filter else {
        return true;
    };
    match std::panic::catch_unwind(AssertUnwindSafe(|| filter(event))) {
        Ok(matched) => matched,
        Err(_) => {
            error!(
                "Filter of {} panicked on event {}",
                subscription.id, event.event_type
            );
            false
        }
    }
}

struct LoopHandle {
    shutdown: CancellationToken,
    task: JoinHandle<UnboundedReceiver<Event>>,
}

/// Asynchronous publish/subscribe bus.
///
/// Every published event goes into one unbounded queue consumed by a single
/// loop task. Events are delivered in publish order, one at a time: wildcard
/// subscribers first, then exact-topic subscribers, each group in
/// subscription order. A failing or panicking handler is logged and does not
/// affect the others.
///
/// Events published before [`start`](Self::start) are queued and delivered
/// once the loop runs.
pub struct EventBus {
    shared: Arc<Shared>,
    sender: RwLock<UnboundedSender<Event>>,
    receiver: Mutex<Option<UnboundedReceiver<Event>>>,
    worker: tokio::sync::Mutex<Option<LoopHandle>>,
    next_id: AtomicU64,
    drain_on_stop: bool,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                subscriptions: RwLock::new(Subscriptions::default()),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                handler_failures: AtomicU64::new(0),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
                running: AtomicBool::new(false),
            }),
            sender: RwLock::new(sender),
            receiver: Mutex::new(Some(receiver)),
            worker: tokio::sync::Mutex::new(None),
            next_id: AtomicU64::new(1),
            drain_on_stop: true,
        }
    }

    pub fn from_config(config: &EventBusConfig) -> Self {
        Self::new().with_drain_on_stop(config.drain_on_stop)
    }

    /// Whether `stop` delivers already queued events before halting.
    pub fn with_drain_on_stop(mut self, drain: bool) -> Self {
        self.drain_on_stop = drain;
        self
    }

    /// Subscribe `handler` to a topic (`"*"` for every event).
    pub fn subscribe<H>(&self, topic: impl Into<Topic>, handler: H) -> SubscriptionId
    where
        H: EventHandler + 'static,
    {
        self.add_subscription(topic.into(), Arc::new(handler), None)
    }

    /// Like [`subscribe`](Self::subscribe), but the handler only sees events
    /// for which `filter` returns true.
    pub fn subscribe_filtered<H, F>(
        &self,
        topic: impl Into<Topic>,
        handler: H,
        filter: F,
    ) -> SubscriptionId
    where
        H: EventHandler + 'static,
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let filter: EventFilter = Arc::new(filter);
        self.add_subscription(topic.into(), Arc::new(handler), Some(filter))
    }

    /// Subscribe an already shared handler.
    pub fn subscribe_arc(
        &self,
        topic: impl Into<Topic>,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        self.add_subscription(topic.into(), handler, None)
    }

    fn add_subscription(
        &self,
        topic: Topic,
        handler: Arc<dyn EventHandler>,
        filter: Option<EventFilter>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("Subscribing {} to {}", id, topic);
        self.shared.subscriptions.write().insert(
            topic,
            Subscription {
                id,
                handler,
                filter,
            },
        );
        id
    }

    /// Remove a subscription. Returns false if it was not found.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.shared.subscriptions.write().remove(id);
        if removed {
            debug!("Unsubscribed {}", id);
        }
        removed
    }

    /// Queue an event for delivery. Never blocks.
    pub fn publish(&self, event: Event) {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        self.shared.published.fetch_add(1, Ordering::Relaxed);
        if let Err(rejected) = self.sender.read().send(event) {
            warn!("Event bus queue closed, dropping {}", rejected.0.event_type);
            self.shared.settle(1);
        }
    }

    /// Spawn the delivery loop.
    pub async fn start(&self) -> Result<(), EventError> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            return Err(EventError::AlreadyRunning);
        }
        let receiver = match self.receiver.lock().take() {
            Some(receiver) => receiver,
            None => self.reopen(),
        };

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            self.shared.clone(),
            receiver,
            shutdown.clone(),
            self.drain_on_stop,
        ));
        self.shared.running.store(true, Ordering::SeqCst);
        *worker = Some(LoopHandle { shutdown, task });
        info!("Event bus started");
        Ok(())
    }

    /// Signal the loop to finish and wait for it. The event being delivered
    /// when `stop` is called always completes.
    pub async fn stop(&self) {
        let Some(handle) = self.worker.lock().await.take() else {
            return;
        };
        handle.shutdown.cancel();
        match handle.task.await {
            Ok(receiver) => {
                *self.receiver.lock() = Some(receiver);
            }
            Err(e) => {
                error!("Event bus loop terminated abnormally: {}", e);
                let receiver = self.reopen();
                *self.receiver.lock() = Some(receiver);
            }
        }
        self.shared.running.store(false, Ordering::SeqCst);
        // Stragglers published during shutdown can no longer be awaited.
        self.shared.idle.notify_waiters();
        info!("Event bus stopped");
    }

    /// Replace the channel after the loop lost its receiver.
    fn reopen(&self) -> UnboundedReceiver<Event> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.sender.write() = sender;
        let lost = self.shared.pending.swap(0, Ordering::SeqCst);
        if lost > 0 {
            warn!("Discarded {} undeliverable events", lost);
        }
        self.shared.idle.notify_waiters();
        receiver
    }

    /// Wait until every event published so far has been delivered.
    ///
    /// Returns immediately when the loop is not running. Must not be called
    /// from inside a handler: the loop would wait on itself.
    pub async fn flush(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.pending.load(Ordering::SeqCst) == 0
                || !self.shared.running.load(Ordering::SeqCst)
            {
                return;
            }
            notified.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Number of subscriptions, across all topics.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscriptions.read().len()
    }

    /// Number of subscriptions on one topic.
    pub fn topic_subscriber_count(&self, topic: impl Into<Topic>) -> usize {
        self.shared.subscriptions.read().topic_count(&topic.into())
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            published: self.shared.published.load(Ordering::Relaxed),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            handler_failures: self.shared.handler_failures.load(Ordering::Relaxed),
            pending: self.shared.pending.load(Ordering::SeqCst),
            subscribers: self.subscriber_count(),
        }
    }

    pub fn health_check(&self) -> HealthCheck {
        let stats = self.stats();
        let check = if self.is_running() {
            HealthCheck::healthy()
        } else {
            HealthCheck::degraded("event bus is not running")
        };
        check.with_details(serde_json::to_value(stats).unwrap_or_default())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_loop(
    shared: Arc<Shared>,
    mut receiver: UnboundedReceiver<Event>,
    shutdown: CancellationToken,
    drain: bool,
) -> UnboundedReceiver<Event> {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = receiver.recv() => match next {
                Some(event) => shared.dispatch(event).await,
                None => break,
            },
        }
    }

    if drain {
        let mut drained = 0usize;
        while let Ok(event) = receiver.try_recv() {
            shared.dispatch(event).await;
            drained += 1;
        }
        if drained > 0 {
            debug!("Delivered {} queued events during shutdown", drained);
        }
    } else {
        let mut discarded = 0usize;
        while receiver.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!("Discarded {} queued events on shutdown", discarded);
        }
        shared.settle(discarded);
    }
    shared.running.store(false, Ordering::SeqCst);
    receiver
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
