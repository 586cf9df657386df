//! Connections for the memory backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::context::Context;
use crate::core::{StorageApi, StorageConn, StorageKind, StorageMode, Transactable, TxnOptions};
use crate::error::{ConnectionError, StorageError, StorageResult};

use super::pool::SessionLease;
use super::store::MemStack;
use super::transaction::MemStackTxn;

/// The leased session, shared with any transaction begun on it.
///
/// Transactions hold a read guard for their whole lifetime, so `close` (which
/// takes the write lock) waits for them to resolve.
pub(crate) type SessionSlot = Arc<RwLock<Option<SessionLease>>>;

/// An exclusive session borrowed from a [`MemStackPool`](super::MemStackPool).
///
/// Operations issued directly on the connection run in autocommit mode. The
/// session goes back to the pool on [`close`](StorageConn::close) or when the
/// connection is dropped.
pub struct MemStackConn {
    session_id: u64,
    kind: StorageKind,
    store: MemStack,
    slot: SessionSlot,
    closed: AtomicBool,
}

impl MemStackConn {
    pub(crate) fn new(lease: SessionLease, kind: StorageKind, store: MemStack) -> Self {
        Self {
            session_id: lease.session_id(),
            kind,
            store,
            slot: Arc::new(RwLock::new(Some(lease))),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the pool-assigned id of the underlying session.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Pushes `value` onto the stack.
    pub fn push(&self, value: Value) -> StorageResult<()> {
        self.ensure_open()?;
        self.store.push(value)
    }

    /// Removes and returns the top value, or `None` if the stack is empty.
    pub fn pop(&self) -> StorageResult<Option<Value>> {
        self.ensure_open()?;
        self.store.pop()
    }

    /// Returns the top value without removing it.
    pub fn peek(&self) -> StorageResult<Option<Value>> {
        self.ensure_open()?;
        self.store.peek()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        // A pending close holds the write lock, which also counts as closed.
        match self.slot.try_read() {
            Ok(guard) if guard.is_some() => Ok(()),
            _ => Err(self.closed_error()),
        }
    }

    fn closed_error(&self) -> StorageError {
        StorageError::Connection(ConnectionError::AlreadyClosed {
            connection_id: format!("session-{}", self.session_id),
        })
    }
}

impl std::fmt::Debug for MemStackConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStackConn")
            .field("session_id", &self.session_id)
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl StorageApi for MemStackConn {
    fn mode(&self) -> StorageMode {
        StorageMode::Conn
    }

    fn kind(&self) -> &StorageKind {
        &self.kind
    }
}

#[async_trait]
impl Transactable for MemStackConn {
    type Txn = MemStackTxn;

    async fn begin_txn(
        &self,
        ctx: &Context,
        opts: Option<&TxnOptions>,
    ) -> StorageResult<MemStackTxn> {
        ctx.check()?;

        let guard = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(ctx.canceled_error()),
            guard = Arc::clone(&self.slot).read_owned() => guard,
        };
        if guard.is_none() {
            return Err(self.closed_error());
        }

        let snapshot = self.store.begin()?;
        Ok(MemStackTxn::begin(
            self.kind.clone(),
            self.store.clone(),
            self.session_id,
            opts.cloned().unwrap_or_default(),
            snapshot,
            guard,
        ))
    }
}

#[async_trait]
impl StorageConn for MemStackConn {
    async fn close(&self) -> StorageResult<()> {
        let lease = self.slot.write().await.take();
        self.closed.store(true, Ordering::Release);

        if lease.is_some() {
            debug!(session_id = self.session_id, "Connection closed");
        }
        // Dropping the lease returns the session to the pool.
        drop(lease);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
