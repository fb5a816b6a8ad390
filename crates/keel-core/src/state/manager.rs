//! State manager: lock-free reads over an atomically swapped snapshot.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use keel_config::StateConfig;
use keel_protocols::error::StateError;
use keel_protocols::event::Event;
use keel_protocols::health::HealthCheck;

use super::transaction::{StagedWrites, TransactionId};
use crate::event_bus::EventBus;

/// Event type published after every write.
pub const STATE_CHANGED: &str = "state_changed";

const EVENT_SOURCE: &str = "state_manager";

/// Observer callback: `(key, old_value, new_value)`. `None` means absent.
pub type ObserverFn = Arc<dyn Fn(&str, Option<&Value>, Option<&Value>) + Send + Sync>;

/// Handle returned by [`StateManager::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Entries = HashMap<String, Value>;

/// One applied change: key, value before, value after.
type Change = (String, Option<Value>, Option<Value>);

/// Shared key/value store.
///
/// Reads never block: they load the current snapshot. Each write (direct or
/// transactional) builds a new snapshot and publishes it with one pointer
/// swap, so a reader sees either none or all of a commit's writes.
///
/// Writers serialise per key. A commit takes the locks of all its keys in
/// sorted order before applying anything, so overlapping commits cannot
/// deadlock.
pub struct StateManager {
    entries: ArcSwap<Entries>,
    key_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    transactions: Mutex<HashMap<TransactionId, StagedWrites>>,
    observers: RwLock<HashMap<String, Vec<(ObserverId, ObserverFn)>>>,
    next_observer: AtomicU64,
    events: Option<Arc<EventBus>>,
    persistence: Option<PathBuf>,
    persist_lock: tokio::sync::Mutex<()>,
    last_persist_error: Mutex<Option<String>>,
}

impl StateManager {
    /// In-memory store that publishes nothing.
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Entries::new()),
            key_locks: DashMap::new(),
            transactions: Mutex::new(HashMap::new()),
            observers: RwLock::new(HashMap::new()),
            next_observer: AtomicU64::new(1),
            events: None,
            persistence: None,
            persist_lock: tokio::sync::Mutex::new(()),
            last_persist_error: Mutex::new(None),
        }
    }

    pub fn from_config(config: &StateConfig, events: Option<Arc<EventBus>>) -> Self {
        let mut manager = Self::new();
        manager.events = events;
        manager.persistence = config.persistence_path();
        manager
    }

    /// Publish a `state_changed` event on `events` after every write.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Rewrite the JSON document at `path` after every committed write.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistence = Some(path.into());
        self
    }

    pub fn persistence_path(&self) -> Option<&Path> {
        self.persistence.as_deref()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.load().get(key).cloned()
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Deserialize the value under `key`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StateError> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.load().contains_key(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.load().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// The current snapshot. Later writes do not affect it.
    pub fn snapshot(&self) -> Arc<Entries> {
        self.entries.load_full()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write `value` under `key`, or stage it when `transaction` is given.
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<Value>,
        transaction: Option<&TransactionId>,
    ) -> Result<(), StateError> {
        let key = key.into();
        let value = value.into();
        match transaction {
            Some(id) => self.stage(id, key, Some(value)),
            None => self.write(key, Some(value)).await,
        }
    }

    /// Remove `key`, or stage the removal when `transaction` is given.
    /// Observers see the new value as `None`.
    pub async fn delete(
        &self,
        key: impl Into<String>,
        transaction: Option<&TransactionId>,
    ) -> Result<(), StateError> {
        let key = key.into();
        match transaction {
            Some(id) => self.stage(id, key, None),
            None => self.write(key, None).await,
        }
    }

    async fn write(&self, key: String, value: Option<Value>) -> Result<(), StateError> {
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let mut writes = BTreeMap::new();
        writes.insert(key, value);
        let changes = self.apply(writes);
        if changes.is_empty() {
            return Ok(());
        }
        self.announce(&changes);
        self.persist().await
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn begin_transaction(&self) -> TransactionId {
        let id = TransactionId::new();
        self.transactions.lock().insert(id, StagedWrites::default());
        debug!("Began transaction {}", id);
        id
    }

    fn stage(
        &self,
        id: &TransactionId,
        key: String,
        value: Option<Value>,
    ) -> Result<(), StateError> {
        let mut transactions = self.transactions.lock();
        let staged = transactions
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownTransaction(id.to_string()))?;
        staged.stage(key, value);
        Ok(())
    }

    /// Apply every staged write at once. The transaction is consumed whether
    /// or not persistence succeeds.
    pub async fn commit_transaction(&self, id: &TransactionId) -> Result<(), StateError> {
        let staged = self
            .transactions
            .lock()
            .remove(id)
            .ok_or_else(|| StateError::UnknownTransaction(id.to_string()))?;
        let writes = staged.into_writes();

        // BTreeMap iteration is sorted: the global lock order.
        let mut guards: Vec<OwnedMutexGuard<()>> = Vec::with_capacity(writes.len());
        for key in writes.keys() {
            guards.push(self.key_lock(key).lock_owned().await);
        }

        let count = writes.len();
        let changes = self.apply(writes);
        debug!("Committed transaction {} ({} writes)", id, count);
        if changes.is_empty() {
            return Ok(());
        }
        self.announce(&changes);
        let persisted = self.persist().await;
        drop(guards);
        persisted
    }

    pub fn rollback_transaction(&self, id: &TransactionId) -> Result<(), StateError> {
        self.transactions
            .lock()
            .remove(id)
            .ok_or_else(|| StateError::UnknownTransaction(id.to_string()))?;
        debug!("Rolled back transaction {}", id);
        Ok(())
    }

    pub fn active_transactions(&self) -> usize {
        self.transactions.lock().len()
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Call `callback` after every successful write to `key`.
    pub fn observe<F>(&self, key: impl Into<String>, callback: F) -> ObserverId
    where
        F: Fn(&str, Option<&Value>, Option<&Value>) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .entry(key.into())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let mut removed = false;
        observers.retain(|_, list| {
            let before = list.len();
            list.retain(|(observer, _)| *observer != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Merge the persisted document into memory. A missing file is not an
    /// error. Returns the number of keys loaded.
    pub async fn load_state(&self) -> Result<usize, StateError> {
        let Some(path) = &self.persistence else {
            return Ok(0);
        };
        if !path.exists() {
            debug!("No persisted state at {:?}", path);
            return Ok(0);
        }

        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| StateError::Persistence {
                path: path.clone(),
                source,
            })?;
        let loaded: Entries = serde_json::from_str(&json)?;
        let count = loaded.len();
        self.entries.rcu(|current| {
            let mut next = Entries::clone(current);
            next.extend(loaded.iter().map(|(k, v)| (k.clone(), v.clone())));
            next
        });
        info!("Loaded {} state entries from {:?}", count, path);
        Ok(count)
    }

    async fn persist(&self) -> Result<(), StateError> {
        let Some(path) = &self.persistence else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;

        let result = self.write_document(path).await;
        match &result {
            Ok(()) => {
                self.last_persist_error.lock().take();
            }
            Err(e) => {
                error!("Failed to persist state: {}", e);
                *self.last_persist_error.lock() = Some(e.to_string());
            }
        }
        result
    }

    async fn write_document(&self, path: &Path) -> Result<(), StateError> {
        let io_error = |source| StateError::Persistence {
            path: path.to_path_buf(),
            source,
        };

        // Sorted for stable diffs of the file.
        let snapshot = self.entries.load_full();
        let ordered: BTreeMap<&String, &Value> = snapshot.iter().collect();
        let json = serde_json::to_string_pretty(&ordered)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        tokio::fs::write(path, json).await.map_err(io_error)?;
        debug!("Persisted {} state entries to {:?}", snapshot.len(), path);
        Ok(())
    }

    pub fn health_check(&self) -> HealthCheck {
        let details = json!({
            "keys": self.len(),
            "active_transactions": self.active_transactions(),
            "persistence": self.persistence.as_ref().map(|p| p.display().to_string()),
        });
        let check = match self.last_persist_error.lock().as_ref() {
            Some(e) => HealthCheck::degraded(format!("last persistence attempt failed: {}", e)),
            None => HealthCheck::healthy(),
        };
        check.with_details(details)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        if let Some(lock) = self.key_locks.get(key) {
            return lock.clone();
        }
        self.key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Publish one new snapshot containing `writes`. Writes that leave a key
    /// as it was are dropped from the returned change list.
    fn apply(&self, writes: BTreeMap<String, Option<Value>>) -> Vec<Change> {
        let previous = self.entries.rcu(|current| {
            let mut next = Entries::clone(current);
            for (key, value) in &writes {
                match value {
                    Some(value) => {
                        next.insert(key.clone(), value.clone());
                    }
                    None => {
                        next.remove(key);
                    }
                }
            }
            next
        });

        writes
            .into_iter()
            .filter_map(|(key, new)| {
                let old = previous.get(&key).cloned();
                if old.is_none() && new.is_none() {
                    return None;
                }
                Some((key, old, new))
            })
            .collect()
    }

    /// Notify observers and publish events, key by key in sorted order.
    fn announce(&self, changes: &[Change]) {
        for (key, old, new) in changes {
            self.notify_observers(key, old.as_ref(), new.as_ref());
            if let Some(events) = &self.events {
                events.publish(
                    Event::new(STATE_CHANGED, EVENT_SOURCE)
                        .with_field("key", Value::String(key.clone()))
                        .with_field("old_value", old.clone().unwrap_or(Value::Null))
                        .with_field("new_value", new.clone().unwrap_or(Value::Null)),
                );
            }
        }
    }

    fn notify_observers(&self, key: &str, old: Option<&Value>, new: Option<&Value>) {
        let callbacks: Vec<ObserverFn> = match self.observers.read().get(key) {
            Some(list) => list.iter().map(|(_, callback)| callback.clone()).collect(),
            None => return,
        };
        for callback in callbacks {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(key, old, new))).is_err() {
                warn!("State observer for {} panicked", key);
            }
        }
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
