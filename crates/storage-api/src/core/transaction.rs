//! Transaction lifecycle traits.
//!
//! [`Transactable`] is the entry point into a unit of work and is implemented
//! by both pools and connections. [`StorageTxn`] is the open unit of work
//! itself, resolved exactly once by `commit` or `rollback`.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::context::Context;
use crate::error::{ErrorKind, StorageResult};

use super::api::StorageApi;

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    /// Read committed - sees only committed data.
    #[default]
    ReadCommitted,
    /// Repeatable read - consistent reads within transaction.
    RepeatableRead,
    /// Serializable - full isolation (may reduce concurrency).
    Serializable,
    /// Snapshot - point-in-time consistent view.
    Snapshot,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => write!(f, "read-committed"),
            IsolationLevel::RepeatableRead => write!(f, "repeatable-read"),
            IsolationLevel::Serializable => write!(f, "serializable"),
            IsolationLevel::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Options for starting a transaction.
///
/// The typed fields cover settings most backends understand. Anything else
/// goes in `extensions`, keyed by backend-specific names; backends ignore
/// keys they do not recognize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxnOptions {
    /// Requested isolation level. `None` uses the backend default.
    pub isolation_level: Option<IsolationLevel>,
    /// Whether this is a read-only transaction.
    pub read_only: bool,
    /// Backend-specific settings.
    pub extensions: BTreeMap<String, Value>,
}

impl TxnOptions {
    /// Creates new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the isolation level.
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Marks this as a read-only transaction.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Adds a backend-specific setting.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Returns a backend-specific setting.
    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TxnState {
    /// Operations may still be issued.
    Open,
    /// Changes were applied. Terminal.
    Committed,
    /// Changes were discarded. Terminal.
    RolledBack,
}

impl TxnState {
    /// Returns `true` for the terminal states.
    pub fn is_resolved(self) -> bool {
        self != TxnState::Open
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnState::Open => write!(f, "open"),
            TxnState::Committed => write!(f, "committed"),
            TxnState::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// An open unit of work.
///
/// The transaction moves from [`TxnState::Open`] to exactly one terminal
/// state. Resolving it again fails with `AlreadyResolved`, as does any other
/// operation issued through it afterwards. A transaction dropped while still
/// open is rolled back.
#[async_trait]
pub trait StorageTxn: StorageApi {
    /// Applies all operations performed since the transaction began.
    ///
    /// # Errors
    ///
    /// * `Conflict` - a concurrent commit invalidated this transaction; it is
    ///   rolled back and must be retried from scratch
    /// * `Canceled` - `ctx` was canceled first; the transaction is rolled back
    /// * `AlreadyResolved` - the transaction was already committed or rolled back
    async fn commit(&self, ctx: &Context) -> StorageResult<()>;

    /// Discards all operations performed since the transaction began.
    ///
    /// # Errors
    ///
    /// * `Canceled` - `ctx` was canceled; the transaction is still rolled back
    /// * `AlreadyResolved` - the transaction was already committed or rolled back
    /// * `ConnectionLost` - the session died; nothing was applied
    async fn rollback(&self, ctx: &Context) -> StorageResult<()>;

    /// Returns the current lifecycle state.
    fn state(&self) -> TxnState;

    /// Returns whether this transaction is still open.
    fn is_active(&self) -> bool {
        self.state() == TxnState::Open
    }
}

/// A pool or connection that can begin a transaction.
#[async_trait]
pub trait Transactable: StorageApi {
    /// The transaction type returned by this source.
    type Txn: StorageTxn;

    /// Begins a new transaction.
    ///
    /// On a pool this first acquires a connection, which stays owned by the
    /// returned transaction until it resolves.
    ///
    /// # Errors
    ///
    /// * `Canceled` - `ctx` was canceled before a session was obtained
    /// * `ConnectionUnavailable` - no session became available in time
    /// * `BackendRejected` - the backend refused to open a transaction
    /// * `AlreadyClosed` / `PoolClosed` - the source was closed
    async fn begin_txn(
        &self,
        ctx: &Context,
        opts: Option<&TxnOptions>,
    ) -> StorageResult<Self::Txn>;
}

/// Executes `f` within a transaction.
///
/// If `f` returns `Ok`, the transaction is committed. If it returns `Err`
/// the transaction is rolled back and the original error is returned. The
/// rollback ignores `ctx` cancellation so it always runs.
///
/// ```ignore
/// let total = with_txn(&pool, &ctx, None, |txn| async move {
///     txn.push(json!(1))?;
///     Ok(txn.len()?)
/// }).await?;
/// ```
pub async fn with_txn<T, F, Fut, R>(
    source: &T,
    ctx: &Context,
    opts: Option<&TxnOptions>,
    f: F,
) -> StorageResult<R>
where
    T: Transactable + ?Sized,
    F: FnOnce(Arc<T::Txn>) -> Fut,
    Fut: Future<Output = StorageResult<R>>,
{
    let txn = Arc::new(source.begin_txn(ctx, opts).await?);

    match f(Arc::clone(&txn)).await {
        Ok(value) => {
            txn.commit(ctx).await?;
            Ok(value)
        }
        Err(err) => {
            if txn.is_active() {
                if let Err(rollback_err) = txn.rollback(&Context::background()).await {
                    warn!(
                        error = %rollback_err,
                        original = %err,
                        "Rollback after failed transaction body also failed"
                    );
                }
            }
            Err(err)
        }
    }
}

/// Executes `f` within a transaction, retrying the whole transaction on
/// transient failures.
///
/// Conflicts and `ConnectionUnavailable` are retried up to
/// `retry.max_retries` times with exponential backoff. Cancellation is never
/// retried, and `ctx` is honored while waiting between attempts.
pub async fn with_txn_retry<T, F, Fut, R>(
    source: &T,
    ctx: &Context,
    opts: Option<&TxnOptions>,
    retry: &RetryConfig,
    mut f: F,
) -> StorageResult<R>
where
    T: Transactable + ?Sized,
    F: FnMut(Arc<T::Txn>) -> Fut,
    Fut: Future<Output = StorageResult<R>>,
{
    let mut attempt: u32 = 0;
    loop {
        match with_txn(source, ctx, opts, &mut f).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < retry.max_retries && should_retry(err.kind()) => {
                attempt += 1;
                let delay = retry.delay_for(attempt);
                debug!(
                    error = %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying transaction"
                );
                ctx.run(async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                })
                .await?;
            }
            Err(err) => return Err(err),
        }
    }
}

fn should_retry(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::Conflict | ErrorKind::ConnectionUnavailable)
}
