//! Transactions for the memory backend.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::OwnedRwLockReadGuard;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::Context;
use crate::core::{StorageApi, StorageKind, StorageMode, StorageTxn, TxnOptions, TxnState};
use crate::error::{BackendError, StorageError, StorageResult, TransactionError};

use super::pool::SessionLease;
use super::store::{BACKEND_NAME, MemStack, Snapshot};

/// A transaction over a [`MemStack`].
///
/// Works on a private copy of the stack taken at begin time (snapshot
/// isolation). Nothing it does is visible to others until `commit`, which
/// fails with `Conflict` if another change was applied to the stack in the
/// meantime. Transactions that made no changes always commit.
pub struct MemStackTxn {
    id: Uuid,
    kind: StorageKind,
    store: MemStack,
    session_id: u64,
    options: TxnOptions,
    inner: Mutex<TxnInner>,
}

struct TxnInner {
    state: TxnState,
    working: Vec<Value>,
    base_version: u64,
    dirty: bool,
    /// Keeps the session leased until the transaction resolves.
    lease: Option<OwnedRwLockReadGuard<Option<SessionLease>>>,
}

impl MemStackTxn {
    pub(crate) fn begin(
        kind: StorageKind,
        store: MemStack,
        session_id: u64,
        options: TxnOptions,
        snapshot: Snapshot,
        lease: OwnedRwLockReadGuard<Option<SessionLease>>,
    ) -> Self {
        let id = Uuid::new_v4();
        debug!(
            txn_id = %id,
            session_id,
            read_only = options.read_only,
            base_version = snapshot.version,
            "Transaction started"
        );

        Self {
            id,
            kind,
            store,
            session_id,
            options,
            inner: Mutex::new(TxnInner {
                state: TxnState::Open,
                working: snapshot.values,
                base_version: snapshot.version,
                dirty: false,
                lease: Some(lease),
            }),
        }
    }

    /// Returns the unique id of this transaction.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the options the transaction was started with.
    pub fn options(&self) -> &TxnOptions {
        &self.options
    }

    /// Pushes `value` onto the transaction's view of the stack.
    pub fn push(&self, value: Value) -> StorageResult<()> {
        let mut inner = self.writable()?;
        inner.working.push(value);
        inner.dirty = true;
        Ok(())
    }

    /// Removes and returns the top value of the transaction's view.
    pub fn pop(&self) -> StorageResult<Option<Value>> {
        let mut inner = self.writable()?;
        let value = inner.working.pop();
        if value.is_some() {
            inner.dirty = true;
        }
        Ok(value)
    }

    /// Returns the top value of the transaction's view.
    pub fn peek(&self) -> StorageResult<Option<Value>> {
        let inner = self.readable()?;
        Ok(inner.working.last().cloned())
    }

    /// Returns the number of values in the transaction's view.
    pub fn len(&self) -> StorageResult<usize> {
        let inner = self.readable()?;
        Ok(inner.working.len())
    }

    /// Returns a copy of the transaction's view, bottom first.
    pub fn values(&self) -> StorageResult<Vec<Value>> {
        let inner = self.readable()?;
        Ok(inner.working.clone())
    }

    fn readable(&self) -> StorageResult<parking_lot::MutexGuard<'_, TxnInner>> {
        let inner = self.inner.lock();
        if inner.state.is_resolved() {
            return Err(self.resolved_error(inner.state));
        }
        self.store.ensure_connected()?;
        Ok(inner)
    }

    fn writable(&self) -> StorageResult<parking_lot::MutexGuard<'_, TxnInner>> {
        let inner = self.readable()?;
        if self.options.read_only {
            return Err(StorageError::Backend(BackendError::Rejected {
                backend_name: BACKEND_NAME.to_string(),
                message: format!("transaction {} is read-only", self.id),
            }));
        }
        Ok(inner)
    }

    fn resolved_error(&self, state: TxnState) -> StorageError {
        StorageError::Transaction(TransactionError::AlreadyResolved {
            txn_id: self.id.to_string(),
            state,
        })
    }

    /// Moves an open transaction to `state` and gives the session back.
    fn resolve(&self, inner: &mut TxnInner, state: TxnState) {
        inner.state = state;
        inner.working = Vec::new();
        inner.lease = None;
        self.store.end_txn();
    }
}

impl std::fmt::Debug for MemStackTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStackTxn")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .finish()
    }
}

impl StorageApi for MemStackTxn {
    fn mode(&self) -> StorageMode {
        StorageMode::Txn
    }

    fn kind(&self) -> &StorageKind {
        &self.kind
    }
}

#[async_trait]
impl StorageTxn for MemStackTxn {
    async fn commit(&self, ctx: &Context) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_resolved() {
            return Err(self.resolved_error(inner.state));
        }

        if let Err(err) = ctx.check() {
            self.resolve(&mut inner, TxnState::RolledBack);
            debug!(txn_id = %self.id, "Transaction rolled back on canceled commit");
            return Err(err);
        }

        let result = if inner.dirty {
            let working = std::mem::take(&mut inner.working);
            self.store
                .apply(&self.id.to_string(), inner.base_version, working)
                .map(|_| ())
        } else {
            self.store.ensure_connected()
        };

        match result {
            Ok(()) => {
                self.resolve(&mut inner, TxnState::Committed);
                debug!(txn_id = %self.id, "Transaction committed");
                Ok(())
            }
            Err(err) => {
                self.resolve(&mut inner, TxnState::RolledBack);
                debug!(txn_id = %self.id, error = %err, "Transaction commit failed");
                Err(err)
            }
        }
    }

    async fn rollback(&self, ctx: &Context) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_resolved() {
            return Err(self.resolved_error(inner.state));
        }

        // Discard first; the outcome below only reports how it went.
        self.resolve(&mut inner, TxnState::RolledBack);
        debug!(txn_id = %self.id, "Transaction rolled back");

        ctx.check()?;
        self.store.ensure_connected()
    }

    fn state(&self) -> TxnState {
        self.inner.lock().state
    }
}

impl Drop for MemStackTxn {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state == TxnState::Open {
            warn!(txn_id = %self.id, "Transaction dropped while open, rolling back");
            inner.state = TxnState::RolledBack;
            inner.lease = None;
            self.store.end_txn();
        }
    }
}
