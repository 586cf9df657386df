//! In-memory stack backend.
//!
//! A complete pool/connection/transaction implementation over a shared
//! [`MemStack`] of JSON values. It is the reference backend for the traits in
//! [`crate::core`] and what the conformance tests run against.
//!
//! | Handle | Type | Mode |
//! |--------|------|------|
//! | Pool | [`MemStackPool`] | `pool` |
//! | Connection | [`MemStackConn`] | `conn` |
//! | Transaction | [`MemStackTxn`] | `txn` |
//!
//! [`MemStack`] also exposes fault injection for tests:
//! [`disconnect`](MemStack::disconnect) makes every operation fail with
//! `ConnectionLost`, and [`set_max_open_txns`](MemStack::set_max_open_txns)
//! makes `begin_txn` fail with `BackendRejected` past a limit.

mod connection;
mod pool;
mod store;
mod transaction;

pub use connection::MemStackConn;
pub use pool::MemStackPool;
pub use store::MemStack;
pub use transaction::MemStackTxn;
