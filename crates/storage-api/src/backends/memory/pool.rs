//! Connection pool for the memory backend.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::context::Context;
use crate::core::{
    PoolStats, StorageApi, StorageKind, StorageMode, StoragePool, Transactable, TxnOptions,
};
use crate::error::{PoolError, StorageError, StorageResult};

use super::connection::MemStackConn;
use super::store::{BACKEND_NAME, MemStack};
use super::transaction::MemStackTxn;

/// A pool of sessions over a [`MemStack`].
///
/// Admission is bounded by `max_connections`; waiters are served in FIFO
/// order. Returned sessions are kept idle (up to `max_idle`) and reused
/// most-recently-returned first, unless they sat idle longer than
/// `idle_timeout`.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use storage_api::backends::memory::{MemStack, MemStackPool};
/// use storage_api::context::Context;
/// use storage_api::core::{StorageConn, StoragePool, StorageTxn, Transactable};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> storage_api::error::StorageResult<()> {
/// let stack = MemStack::new();
/// let pool = MemStackPool::open_default(stack.clone());
/// let ctx = Context::background();
///
/// let conn = pool.conn(&ctx).await?;
/// let txn = conn.begin_txn(&ctx, None).await?;
/// txn.push(json!("a"))?;
/// txn.commit(&ctx).await?;
/// conn.close().await?;
/// pool.close().await?;
///
/// assert_eq!(stack.snapshot(), vec![json!("a")]);
/// # Ok(())
/// # }
/// ```
pub struct MemStackPool {
    shared: Arc<PoolShared>,
}

pub(crate) struct PoolShared {
    store: MemStack,
    kind: StorageKind,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    drained: Notify,
    next_session_id: AtomicU64,
}

#[derive(Default)]
struct PoolState {
    closed: bool,
    idle: VecDeque<MemSession>,
    active: u32,
    pending: u32,
}

/// One logical session with the stack.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MemSession {
    pub(crate) id: u64,
    opened_at: Instant,
    last_used: Instant,
}

impl MemSession {
    fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            opened_at: now,
            last_used: now,
        }
    }

    fn is_expired(&self, idle_timeout: Option<std::time::Duration>, now: Instant) -> bool {
        idle_timeout.is_some_and(|timeout| now.duration_since(self.last_used) > timeout)
    }
}

/// A session checked out of the pool.
///
/// Dropping the lease returns the session and frees its admission slot.
pub(crate) struct SessionLease {
    pool: Arc<PoolShared>,
    session: MemSession,
    _permit: OwnedSemaphorePermit,
}

impl SessionLease {
    pub(crate) fn session_id(&self) -> u64 {
        self.session.id
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.pool.release(Some(self.session));
    }
}

/// Counts a caller as pending for as long as it waits for a slot.
struct PendingGuard<'a> {
    pool: &'a PoolShared,
}

impl<'a> PendingGuard<'a> {
    fn new(pool: &'a PoolShared) -> Self {
        pool.state.lock().pending += 1;
        Self { pool }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.pool.state.lock();
        state.pending = state.pending.saturating_sub(1);
    }
}

impl PoolShared {
    fn closed_error(&self) -> StorageError {
        StorageError::Pool(PoolError::Closed {
            backend_name: BACKEND_NAME.to_string(),
        })
    }

    async fn acquire(self: &Arc<Self>, ctx: &Context) -> StorageResult<SessionLease> {
        ctx.check()?;
        if self.state.lock().closed {
            return Err(self.closed_error());
        }

        let permit = {
            let _pending = PendingGuard::new(self);
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    debug!(backend = BACKEND_NAME, "Connection request canceled");
                    return Err(ctx.canceled_error());
                }
                permit = self.wait_for_permit() => permit?,
            }
        };

        let (reused, expired) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(self.closed_error());
            }
            let now = Instant::now();
            let before = state.idle.len();
            state
                .idle
                .retain(|session| !session.is_expired(self.config.idle_timeout, now));
            let expired = before - state.idle.len();
            state.active += 1;
            (state.idle.pop_back(), expired)
        };

        if expired > 0 {
            debug!(backend = BACKEND_NAME, expired, "Discarded expired idle sessions");
        }

        let session = match reused {
            Some(session) if self.store.is_connected() => {
                debug!(session_id = session.id, "Reusing idle session");
                session
            }
            // A dead idle session is dropped; opening a new one reports why.
            _ => match self.open_session() {
                Ok(session) => session,
                Err(err) => {
                    self.release(None);
                    return Err(err);
                }
            },
        };

        Ok(SessionLease {
            pool: Arc::clone(self),
            session,
            _permit: permit,
        })
    }

    async fn wait_for_permit(&self) -> StorageResult<OwnedSemaphorePermit> {
        let acquire = Arc::clone(&self.permits).acquire_owned();
        let permit = match self.config.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, acquire).await.map_err(|_| {
                StorageError::Pool(PoolError::ConnectionUnavailable {
                    backend_name: BACKEND_NAME.to_string(),
                    waited_ms: timeout.as_millis() as u64,
                })
            })?,
            None => acquire.await,
        };
        // The semaphore is only closed by `close()`.
        permit.map_err(|_| self.closed_error())
    }

    fn open_session(&self) -> StorageResult<MemSession> {
        self.store.ensure_connected()?;
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(session_id = id, "Opened new session");
        Ok(MemSession::new(id))
    }

    fn release(&self, session: Option<MemSession>) {
        let drained = {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);

            if let Some(mut session) = session {
                let keep = !state.closed
                    && (state.idle.len() as u32) < self.config.effective_max_idle()
                    && self.store.is_connected();
                if keep {
                    session.last_used = Instant::now();
                    state.idle.push_back(session);
                } else {
                    debug!(
                        session_id = session.id,
                        age_ms = session.opened_at.elapsed().as_millis() as u64,
                        "Terminated session"
                    );
                }
            }

            state.active == 0
        };

        if drained {
            self.drained.notify_waiters();
        }
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.state.lock().active == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl MemStackPool {
    /// Opens a key-value pool over `store`.
    pub fn open(store: MemStack, config: PoolConfig) -> StorageResult<Self> {
        Self::open_as(StorageKind::KEY_VALUE, store, config)
    }

    /// Opens a pool over `store` that reports itself as `kind`.
    pub fn open_as(kind: StorageKind, store: MemStack, config: PoolConfig) -> StorageResult<Self> {
        config.validate()?;
        Ok(Self::build(kind, store, config))
    }

    /// Opens a key-value pool over `store` with the default configuration.
    pub fn open_default(store: MemStack) -> Self {
        Self::build(StorageKind::KEY_VALUE, store, PoolConfig::default())
    }

    fn build(kind: StorageKind, store: MemStack, config: PoolConfig) -> Self {
        let permits = if config.is_unbounded() {
            Semaphore::MAX_PERMITS
        } else {
            config.max_connections as usize
        };

        info!(
            backend = BACKEND_NAME,
            kind = %kind,
            max_connections = config.max_connections,
            "Opened pool"
        );

        Self {
            shared: Arc::new(PoolShared {
                store,
                kind,
                config,
                permits: Arc::new(Semaphore::new(permits)),
                state: Mutex::new(PoolState::default()),
                drained: Notify::new(),
                next_session_id: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the underlying stack.
    pub fn store(&self) -> &MemStack {
        &self.shared.store
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }
}

impl std::fmt::Debug for MemStackPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStackPool")
            .field("kind", &self.shared.kind)
            .field("active", &self.active_connections())
            .field("idle", &self.idle_connections())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl StorageApi for MemStackPool {
    fn mode(&self) -> StorageMode {
        StorageMode::Pool
    }

    fn kind(&self) -> &StorageKind {
        &self.shared.kind
    }
}

#[async_trait]
impl Transactable for MemStackPool {
    type Txn = MemStackTxn;

    async fn begin_txn(
        &self,
        ctx: &Context,
        opts: Option<&TxnOptions>,
    ) -> StorageResult<MemStackTxn> {
        // The transaction keeps the session leased; dropping the handle here
        // does not return it to the pool.
        let conn = self.conn(ctx).await?;
        conn.begin_txn(ctx, opts).await
    }
}

#[async_trait]
impl StoragePool for MemStackPool {
    type Conn = MemStackConn;

    async fn conn(&self, ctx: &Context) -> StorageResult<MemStackConn> {
        let lease = self.shared.acquire(ctx).await?;
        debug!(session_id = lease.session_id(), "Connection acquired");
        Ok(MemStackConn::new(
            lease,
            self.shared.kind.clone(),
            self.shared.store.clone(),
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        let (first, idle, active) = {
            let mut state = self.shared.state.lock();
            let first = !state.closed;
            state.closed = true;
            (first, std::mem::take(&mut state.idle), state.active)
        };
        self.shared.permits.close();

        if first {
            info!(
                backend = BACKEND_NAME,
                idle = idle.len(),
                active,
                "Closing pool, waiting for outstanding connections"
            );
        }
        drop(idle);

        self.shared.wait_drained().await;

        if first {
            info!(backend = BACKEND_NAME, "Pool closed");
        }
        Ok(())
    }
}

impl PoolStats for MemStackPool {
    fn active_connections(&self) -> u32 {
        self.shared.state.lock().active
    }

    fn idle_connections(&self) -> u32 {
        self.shared.state.lock().idle.len() as u32
    }

    fn max_connections(&self) -> u32 {
        self.shared.config.max_connections
    }

    fn pending_connections(&self) -> u32 {
        self.shared.state.lock().pending
    }

    fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_session_expiry() {
        let session = MemSession::new(1);
        let later = session.last_used + Duration::from_secs(10);

        assert!(!session.is_expired(None, later));
        assert!(!session.is_expired(Some(Duration::from_secs(30)), later));
        assert!(session.is_expired(Some(Duration::from_secs(5)), later));
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let config = PoolConfig::new().with_max_connections(1).with_max_idle(2);
        let err = MemStackPool::open(MemStack::new(), config).unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn test_open_with_only_max_connections() {
        let config = PoolConfig::new().with_max_connections(4);
        let pool = MemStackPool::open(MemStack::new(), config).unwrap();
        assert_eq!(pool.max_connections(), 4);
        assert_eq!(pool.config().effective_max_idle(), 4);
    }

    #[test]
    fn test_open_as_custom_kind() {
        let pool =
            MemStackPool::open_as(StorageKind::DOCUMENT, MemStack::new(), PoolConfig::default())
                .unwrap();
        assert_eq!(pool.kind(), &StorageKind::DOCUMENT);
        assert_eq!(pool.mode(), StorageMode::Pool);
        assert_eq!(pool.max_connections(), 10);
    }

    #[tokio::test]
    async fn test_idle_session_is_reused() {
        let pool = MemStackPool::open_default(MemStack::new());
        let ctx = Context::background();

        let first = pool.conn(&ctx).await.unwrap();
        let first_id = first.session_id();
        crate::core::StorageConn::close(&first).await.unwrap();
        assert_eq!(pool.idle_connections(), 1);

        let second = pool.conn(&ctx).await.unwrap();
        assert_eq!(second.session_id(), first_id);
        assert_eq!(pool.idle_connections(), 0);
        assert_eq!(pool.active_connections(), 1);
    }
}
