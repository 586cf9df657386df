//! Shared stack state behind the memory backend.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{BackendError, StorageError, StorageResult, TransactionError};

pub(crate) const BACKEND_NAME: &str = "memory";

/// A thread-safe in-memory stack of JSON values.
///
/// This is the "database" the memory backend talks to. Clones share the same
/// state, so tests can keep a handle to inspect what was committed through a
/// pool.
#[derive(Debug, Clone, Default)]
pub struct MemStack {
    inner: Arc<Mutex<StackState>>,
}

#[derive(Debug, Default)]
struct StackState {
    values: Vec<Value>,
    /// Bumped on every applied change; used for commit conflict detection.
    version: u64,
    disconnected: bool,
    open_txns: u32,
    max_open_txns: Option<u32>,
}

/// A point-in-time copy of the stack taken when a transaction begins.
pub(crate) struct Snapshot {
    pub(crate) values: Vec<Value>,
    pub(crate) version: u64,
}

impl MemStack {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stack pre-populated with `values` (bottom first).
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let stack = Self::new();
        stack.inner.lock().values = values.into_iter().collect();
        stack
    }

    /// Returns a copy of the committed values, bottom first.
    pub fn snapshot(&self) -> Vec<Value> {
        self.inner.lock().values.clone()
    }

    /// Returns the number of committed values.
    pub fn len(&self) -> usize {
        self.inner.lock().values.len()
    }

    /// Returns `true` if no values are committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `value` is committed anywhere in the stack.
    pub fn contains(&self, value: &Value) -> bool {
        self.inner.lock().values.contains(value)
    }

    /// Returns the number of changes applied so far.
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Simulates losing the connection to the backend.
    ///
    /// Until [`reconnect`](Self::reconnect) is called, new sessions cannot be
    /// opened and every operation through an existing session fails with
    /// `ConnectionLost`.
    pub fn disconnect(&self) {
        self.inner.lock().disconnected = true;
    }

    /// Restores connectivity after [`disconnect`](Self::disconnect).
    pub fn reconnect(&self) {
        self.inner.lock().disconnected = false;
    }

    /// Returns `false` while disconnected.
    pub fn is_connected(&self) -> bool {
        !self.inner.lock().disconnected
    }

    /// Limits how many transactions may be open at once. Beyond the limit,
    /// `begin_txn` fails with `BackendRejected`.
    pub fn set_max_open_txns(&self, limit: Option<u32>) {
        self.inner.lock().max_open_txns = limit;
    }

    /// Returns the number of transactions currently open.
    pub fn open_txns(&self) -> u32 {
        self.inner.lock().open_txns
    }

    pub(crate) fn ensure_connected(&self) -> StorageResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(connection_lost())
        }
    }

    pub(crate) fn push(&self, value: Value) -> StorageResult<()> {
        let mut state = self.connected_state()?;
        state.values.push(value);
        state.version += 1;
        Ok(())
    }

    pub(crate) fn pop(&self) -> StorageResult<Option<Value>> {
        let mut state = self.connected_state()?;
        let value = state.values.pop();
        if value.is_some() {
            state.version += 1;
        }
        Ok(value)
    }

    pub(crate) fn peek(&self) -> StorageResult<Option<Value>> {
        let state = self.connected_state()?;
        Ok(state.values.last().cloned())
    }

    pub(crate) fn begin(&self) -> StorageResult<Snapshot> {
        let mut state = self.connected_state()?;
        if let Some(limit) = state.max_open_txns {
            if state.open_txns >= limit {
                return Err(StorageError::Backend(BackendError::Rejected {
                    backend_name: BACKEND_NAME.to_string(),
                    message: format!("open transaction limit of {} reached", limit),
                }));
            }
        }
        state.open_txns += 1;
        Ok(Snapshot {
            values: state.values.clone(),
            version: state.version,
        })
    }

    /// Replaces the stack with `values` if nothing was applied since
    /// `base_version`. Returns the new version.
    pub(crate) fn apply(
        &self,
        txn_id: &str,
        base_version: u64,
        values: Vec<Value>,
    ) -> StorageResult<u64> {
        let mut state = self.connected_state()?;
        if state.version != base_version {
            return Err(StorageError::Transaction(TransactionError::Conflict {
                txn_id: txn_id.to_string(),
                message: format!(
                    "stack changed from version {} to {} since the transaction began",
                    base_version, state.version
                ),
            }));
        }
        state.values = values;
        state.version += 1;
        Ok(state.version)
    }

    pub(crate) fn end_txn(&self) {
        let mut state = self.inner.lock();
        state.open_txns = state.open_txns.saturating_sub(1);
    }

    fn connected_state(&self) -> StorageResult<parking_lot::MutexGuard<'_, StackState>> {
        let state = self.inner.lock();
        if state.disconnected {
            return Err(connection_lost());
        }
        Ok(state)
    }
}

fn connection_lost() -> StorageError {
    StorageError::Backend(BackendError::ConnectionLost {
        backend_name: BACKEND_NAME.to_string(),
        message: "backend disconnected".to_string(),
    })
}
