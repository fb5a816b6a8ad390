//! Transaction identifiers and staged writes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifier returned by `StateManager::begin_transaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Writes staged by one transaction. `None` stages a delete. Keys are kept
/// sorted, which is also the order their locks are taken in on commit.
#[derive(Debug, Default)]
pub(crate) struct StagedWrites {
    writes: BTreeMap<String, Option<Value>>,
}

impl StagedWrites {
    /// Stage a write; a later write to the same key replaces the earlier one.
    pub(crate) fn stage(&mut self, key: String, value: Option<Value>) {
        self.writes.insert(key, value);
    }

    pub(crate) fn into_writes(self) -> BTreeMap<String, Option<Value>> {
        self.writes
    }
}
