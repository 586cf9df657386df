//! Connection pool trait and statistics.

use async_trait::async_trait;

use crate::context::Context;
use crate::error::StorageResult;

use super::connection::StorageConn;
use super::transaction::Transactable;

/// A long-lived broker of connections.
///
/// Pools are meant to be long-lived and shared between concurrent callers.
/// They are constructed explicitly and passed by reference (or in an `Arc`)
/// to whoever needs them.
///
/// # Example
///
/// ```ignore
/// use storage_api::context::Context;
/// use storage_api::core::{StorageConn, StoragePool, StorageTxn, Transactable};
/// use storage_api::error::StorageResult;
///
/// async fn record<P: StoragePool>(pool: &P, ctx: &Context) -> StorageResult<()> {
///     let conn = pool.conn(ctx).await?;
///     let txn = conn.begin_txn(ctx, None).await?;
///     // ... operations on txn
///     txn.commit(ctx).await?;
///     conn.close().await
/// }
/// ```
#[async_trait]
pub trait StoragePool: Transactable {
    /// The connection type handed out by this pool.
    type Conn: StorageConn;

    /// Returns a connection, either reusing an idle session or opening a new
    /// one.
    ///
    /// Does not resolve until a connection is available or `ctx` is
    /// canceled. Operations on the same connection run in the same session.
    ///
    /// # Errors
    ///
    /// * `Canceled` - `ctx` was canceled while waiting; no connection is consumed
    /// * `ConnectionUnavailable` - the pool stayed exhausted past its acquire timeout
    /// * `PoolClosed` - the pool was closed before or while waiting
    async fn conn(&self, ctx: &Context) -> StorageResult<Self::Conn>;

    /// Closes the entire pool.
    ///
    /// New `conn` and `begin_txn` requests fail with `PoolClosed` from the
    /// moment this is called; `close` then waits for every outstanding
    /// connection to be returned. Closing a closed pool is a no-op that still
    /// waits for outstanding connections.
    async fn close(&self) -> StorageResult<()>;
}

/// Extension trait for pools that report connection statistics.
pub trait PoolStats {
    /// Returns the number of connections currently handed out.
    fn active_connections(&self) -> u32;

    /// Returns the number of idle sessions kept for reuse.
    fn idle_connections(&self) -> u32;

    /// Returns the maximum pool size (0 = unbounded).
    fn max_connections(&self) -> u32;

    /// Returns the number of callers waiting for a connection.
    fn pending_connections(&self) -> u32;

    /// Returns `true` once the pool has stopped accepting requests.
    fn is_closed(&self) -> bool;
}
