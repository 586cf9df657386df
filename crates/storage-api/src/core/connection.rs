//! Connection (session) trait.

use async_trait::async_trait;

use crate::error::StorageResult;

use super::transaction::Transactable;

/// One exclusive session against a backend.
///
/// A connection is owned by a single caller between acquisition and
/// [`close`](StorageConn::close). Dropping a connection without closing it
/// releases the session the same way.
#[async_trait]
pub trait StorageConn: Transactable {
    /// Returns the connection to its source pool.
    ///
    /// `close` is safe to call concurrently with other operations on the same
    /// connection and does not complete until they finish, including any
    /// transaction begun on this connection that is still open. Afterwards
    /// every operation except `close` fails with `AlreadyClosed`.
    ///
    /// Closing an already closed connection is a no-op.
    async fn close(&self) -> StorageResult<()>;

    /// Returns `true` once `close` has completed.
    fn is_closed(&self) -> bool;
}
