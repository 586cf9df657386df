//! Storage API
//!
//! A backend-agnostic contract for talking to storage systems through three
//! nested handles: a **pool** that brokers connections, a **connection**
//! that is one exclusive session, and a **transaction** that is one unit of
//! work. Concrete drivers implement the traits in [`core`]; application code
//! depends only on the traits.
//!
//! # Features
//!
//! - **Composable capabilities**: identity, transaction start, connection
//!   release and pool shutdown are separate traits combined by supertraits
//! - **Cancellation**: every suspending operation takes a [`Context`] that
//!   can be canceled or carry a deadline
//! - **Classified errors**: each failure maps to an [`ErrorKind`] and an
//!   [`ErrorClass`] (transient, caller bug, fatal)
//! - **Open kinds**: [`StorageKind`] names well-known backend families and
//!   accepts any caller-defined one
//!
//! Backend features:
//! - `memory` (default) - in-process stack backend, see [`backends::memory`]
//!
//! # Architecture
//!
//! - [`core`] - The storage traits and handle identity
//! - [`context`] - Cancellation and deadlines
//! - [`config`] - Pool and retry configuration
//! - [`error`] - Error types and classification
//! - [`backends`] - Backend implementations
//!
//! # Quick Start
//!
//! ```
//! use serde_json::json;
//! use storage_api::backends::memory::{MemStack, MemStackPool};
//! use storage_api::{Context, PoolConfig, StorageResult, with_txn};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> StorageResult<()> {
//! let stack = MemStack::new();
//! let pool = MemStackPool::open(stack.clone(), PoolConfig::new().with_max_connections(4))?;
//! let ctx = Context::background();
//!
//! let depth = with_txn(&pool, &ctx, None, |txn| async move {
//!     txn.push(json!({"job": 1}))?;
//!     txn.push(json!({"job": 2}))?;
//!     txn.len()
//! })
//! .await?;
//!
//! assert_eq!(depth, 2);
//! assert_eq!(stack.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! # Cancellation
//!
//! Operations that can block check their context first and give up as soon
//! as it is canceled. A canceled wait for a pool slot leaves the pool exactly
//! as it was; a canceled commit rolls the transaction back.
//!
//! ```
//! use std::time::Duration;
//! use storage_api::backends::memory::{MemStack, MemStackPool};
//! use storage_api::core::StoragePool;
//! use storage_api::{Context, PoolConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = PoolConfig::new().with_max_connections(1).with_max_idle(1);
//! let pool = MemStackPool::open(MemStack::new(), config).unwrap();
//!
//! let _held = pool.conn(&Context::background()).await.unwrap();
//!
//! let ctx = Context::background().with_timeout(Duration::from_millis(10));
//! let err = pool.conn(&ctx).await.unwrap_err();
//! assert!(err.is_canceled());
//! # }
//! ```

#![warn(missing_docs)]

pub mod backends;
pub mod config;
pub mod context;
pub mod core;
pub mod error;

pub use config::{PoolConfig, RetryConfig};
pub use context::{CancelReason, Context};
pub use core::{
    StorageApi, StorageConn, StorageKind, StorageMode, StoragePool, StorageTxn, Transactable,
    TxnOptions, TxnState, with_txn, with_txn_retry,
};
pub use error::{ErrorClass, ErrorKind, StorageError, StorageResult};
