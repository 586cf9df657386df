//! Core storage contract.
//!
//! The contract is a set of capability traits composed by supertraits rather
//! than a class hierarchy:
//!
//! ```text
//! StorageApi (mode + kind)
//!     ├── Transactable (begin_txn)
//!     │       ├── StorageConn (close: return to pool)
//!     │       └── StoragePool (conn, close: shutdown)
//!     └── StorageTxn (commit, rollback)
//! ```
//!
//! Control flow: a caller holds a [`StoragePool`], acquires a
//! [`StorageConn`], optionally begins a [`StorageTxn`], resolves it, and
//! closes the connection back to the pool. Pools can also begin
//! transactions directly.

pub mod api;
pub mod connection;
pub mod pool;
pub mod transaction;

// Re-export main types
pub use api::{StorageApi, StorageKind, StorageMode};
pub use connection::StorageConn;
pub use pool::{PoolStats, StoragePool};
pub use transaction::{
    IsolationLevel, StorageTxn, Transactable, TxnOptions, TxnState, with_txn, with_txn_retry,
};
