//! Conformance harness for pool/connection/transaction backends.
//!
//! A backend opts in by implementing [`TestablePool`]; every `check_*`
//! function is then a behavior the backend must exhibit. Checks panic on
//! failure so they can be called directly from `#[tokio::test]` functions.

use std::task::Poll;
use std::time::Duration;

use serde_json::{Value, json};
use storage_api::config::PoolConfig;
use storage_api::context::Context;
use storage_api::core::{PoolStats, StorageConn, StoragePool, StorageTxn, Transactable};
use storage_api::error::{ErrorKind, StorageResult};

/// Transaction type of a testable pool's connections.
pub type ConnTxn<P> = <<P as StoragePool>::Conn as Transactable>::Txn;

/// Trait that pools must implement to run the conformance suite.
///
/// # Example
///
/// ```ignore
/// impl TestablePool for MyPool {
///     fn open_fresh(config: PoolConfig) -> StorageResult<Self> {
///         MyPool::connect(fresh_database(), config)
///     }
///
///     fn write(txn: &ConnTxn<Self>, value: Value) -> StorageResult<()> {
///         txn.insert(value)
///     }
///     // ...
/// }
/// ```
pub trait TestablePool: StoragePool + PoolStats + Sized + 'static {
    /// Opens a pool over fresh, empty backend state.
    fn open_fresh(config: PoolConfig) -> StorageResult<Self>;

    /// Writes `value` through a transaction.
    fn write(txn: &ConnTxn<Self>, value: Value) -> StorageResult<()>;

    /// Reads the most recent value visible to a transaction.
    fn read_latest(txn: &ConnTxn<Self>) -> StorageResult<Option<Value>>;

    /// Returns every committed value, bypassing the pool.
    fn committed(&self) -> Vec<Value>;
}

/// A single-slot configuration that waits forever for a connection.
pub fn single_slot_config() -> PoolConfig {
    PoolConfig::new()
        .with_max_connections(1)
        .with_max_idle(1)
        .with_acquire_timeout(None)
}

fn open<P: TestablePool>(config: PoolConfig) -> P {
    P::open_fresh(config).expect("Failed to open pool")
}

fn expect_kind<T>(result: StorageResult<T>, kind: ErrorKind) {
    match result {
        Ok(_) => panic!("expected {} error, got Ok", kind),
        Err(err) => assert_eq!(err.kind(), kind, "unexpected error: {}", err),
    }
}

// ============================================================================
// Pool Lifecycle
// ============================================================================

/// After `close` resolves, `conn` fails with `PoolClosed`.
pub async fn check_conn_after_close_fails<P: TestablePool>() {
    let pool = open::<P>(PoolConfig::default());
    let ctx = Context::background();

    pool.close().await.unwrap();
    assert!(pool.is_closed());
    expect_kind(pool.conn(&ctx).await, ErrorKind::PoolClosed);
    expect_kind(pool.begin_txn(&ctx, None).await, ErrorKind::PoolClosed);

    // Closing again is harmless.
    pool.close().await.unwrap();
}

/// Canceling a pending `conn` fails it with `Canceled` and leaves the pool
/// counters as they were.
pub async fn check_canceled_conn_leaves_pool_unchanged<P: TestablePool>() {
    let pool = open::<P>(single_slot_config());
    let held = pool.conn(&Context::background()).await.unwrap();

    let active = pool.active_connections();
    let idle = pool.idle_connections();

    let ctx = Context::new();
    let mut pending = tokio_test::task::spawn(pool.conn(&ctx));
    assert!(pending.poll().is_pending());
    assert_eq!(pool.pending_connections(), 1);

    ctx.cancel();
    assert!(pending.is_woken());
    let result = match pending.poll() {
        Poll::Ready(result) => result,
        Poll::Pending => panic!("conn still pending after cancel"),
    };
    drop(pending);

    match result {
        Ok(_) => panic!("canceled conn returned a connection"),
        Err(err) => assert!(err.is_canceled(), "unexpected error: {}", err),
    }
    assert_eq!(pool.pending_connections(), 0);
    assert_eq!(pool.active_connections(), active);
    assert_eq!(pool.idle_connections(), idle);

    held.close().await.unwrap();
}

/// A connection waiting on a full pool gets the slot once it is released.
pub async fn check_waiter_gets_released_slot<P: TestablePool>() {
    let pool = open::<P>(single_slot_config());
    let ctx = Context::background();
    let held = pool.conn(&ctx).await.unwrap();

    let mut pending = tokio_test::task::spawn(pool.conn(&ctx));
    assert!(pending.poll().is_pending());

    held.close().await.unwrap();
    assert!(pending.is_woken());
    let conn = match pending.poll() {
        Poll::Ready(result) => result.unwrap(),
        Poll::Pending => panic!("waiter not served after release"),
    };
    drop(pending);

    assert_eq!(pool.active_connections(), 1);
    conn.close().await.unwrap();
    pool.close().await.unwrap();
}

/// Pool `begin_txn` goes through the same admission as `conn`: it times out
/// with `ConnectionUnavailable` or fails with `Canceled` while waiting, and
/// neither outcome changes the pool counters.
pub async fn check_pool_begin_txn_waits_for_slot<P: TestablePool>() {
    let config = single_slot_config().with_acquire_timeout(Some(Duration::from_millis(50)));
    let pool = open::<P>(config);
    let held = pool.conn(&Context::background()).await.unwrap();

    let counters = |pool: &P| {
        (
            pool.active_connections(),
            pool.idle_connections(),
            pool.pending_connections(),
        )
    };
    let before = counters(&pool);

    expect_kind(
        pool.begin_txn(&Context::background(), None).await,
        ErrorKind::ConnectionUnavailable,
    );
    assert_eq!(counters(&pool), before);

    let ctx = Context::new();
    let mut pending = tokio_test::task::spawn(pool.begin_txn(&ctx, None));
    assert!(pending.poll().is_pending());
    assert_eq!(pool.pending_connections(), 1);

    ctx.cancel();
    assert!(pending.is_woken());
    let result = match pending.poll() {
        Poll::Ready(result) => result,
        Poll::Pending => panic!("begin_txn still pending after cancel"),
    };
    drop(pending);

    expect_kind(result, ErrorKind::Canceled);
    assert_eq!(counters(&pool), before);

    held.close().await.unwrap();
}

// ============================================================================
// Transaction Lifecycle
// ============================================================================

/// A second `commit` or `rollback` fails with `AlreadyResolved`.
pub async fn check_double_resolve_fails<P: TestablePool>() {
    let pool = open::<P>(PoolConfig::default());
    let ctx = Context::background();
    let conn = pool.conn(&ctx).await.unwrap();

    let txn = conn.begin_txn(&ctx, None).await.unwrap();
    txn.commit(&ctx).await.unwrap();
    expect_kind(txn.commit(&ctx).await, ErrorKind::AlreadyResolved);
    expect_kind(txn.rollback(&ctx).await, ErrorKind::AlreadyResolved);

    let txn = conn.begin_txn(&ctx, None).await.unwrap();
    txn.rollback(&ctx).await.unwrap();
    expect_kind(txn.rollback(&ctx).await, ErrorKind::AlreadyResolved);
    expect_kind(txn.commit(&ctx).await, ErrorKind::AlreadyResolved);

    conn.close().await.unwrap();
}

/// `close` on a connection does not complete while a transaction begun on
/// it is still open.
pub async fn check_conn_close_waits_for_txn<P: TestablePool>() {
    let pool = open::<P>(PoolConfig::default());
    let ctx = Context::background();
    let conn = pool.conn(&ctx).await.unwrap();
    let txn = conn.begin_txn(&ctx, None).await.unwrap();
    P::write(&txn, json!("in-flight")).unwrap();

    let mut closing = tokio_test::task::spawn(conn.close());
    assert!(closing.poll().is_pending());

    txn.commit(&ctx).await.unwrap();
    assert!(closing.is_woken());
    match closing.poll() {
        Poll::Ready(result) => result.unwrap(),
        Poll::Pending => panic!("close still pending after commit"),
    }
    drop(closing);

    assert!(conn.is_closed());
    assert_eq!(pool.committed(), vec![json!("in-flight")]);
}

/// Committed writes are visible to later connections, rolled back writes
/// never are.
pub async fn check_commit_visible_rollback_invisible<P: TestablePool>() {
    let pool = open::<P>(PoolConfig::default());
    let ctx = Context::background();

    let conn = pool.conn(&ctx).await.unwrap();
    let txn = conn.begin_txn(&ctx, None).await.unwrap();
    P::write(&txn, json!("kept")).unwrap();
    txn.commit(&ctx).await.unwrap();

    let txn = conn.begin_txn(&ctx, None).await.unwrap();
    P::write(&txn, json!("discarded")).unwrap();
    txn.rollback(&ctx).await.unwrap();
    conn.close().await.unwrap();

    let later = pool.conn(&ctx).await.unwrap();
    let txn = later.begin_txn(&ctx, None).await.unwrap();
    assert_eq!(P::read_latest(&txn).unwrap(), Some(json!("kept")));
    txn.commit(&ctx).await.unwrap();
    later.close().await.unwrap();

    assert_eq!(pool.committed(), vec![json!("kept")]);
}

// ============================================================================
// End-to-end Scenarios
// ============================================================================

/// pool -> conn -> begin_txn -> write -> commit -> close conn -> close pool.
pub async fn scenario_commit_round_trip<P: TestablePool>() {
    let pool = open::<P>(PoolConfig::default());
    let ctx = Context::background();

    let conn = pool.conn(&ctx).await.unwrap();
    let txn = conn.begin_txn(&ctx, None).await.unwrap();
    P::write(&txn, json!("a")).unwrap();
    txn.commit(&ctx).await.unwrap();
    conn.close().await.unwrap();
    pool.close().await.unwrap();

    assert_eq!(pool.committed(), vec![json!("a")]);
}

/// pool -> conn -> begin_txn -> write -> rollback -> close conn.
pub async fn scenario_rollback_discards<P: TestablePool>() {
    let pool = open::<P>(PoolConfig::default());
    let ctx = Context::background();

    let conn = pool.conn(&ctx).await.unwrap();
    let txn = conn.begin_txn(&ctx, None).await.unwrap();
    P::write(&txn, json!("b")).unwrap();
    txn.rollback(&ctx).await.unwrap();
    conn.close().await.unwrap();

    assert!(!pool.committed().contains(&json!("b")));
}

/// pool -> conn -> cancel ctx -> begin_txn fails, connection stays usable.
pub async fn scenario_canceled_begin_keeps_conn<P: TestablePool>() {
    let pool = open::<P>(PoolConfig::default());
    let conn = pool.conn(&Context::background()).await.unwrap();

    let ctx = Context::new();
    ctx.cancel();
    expect_kind(conn.begin_txn(&ctx, None).await, ErrorKind::Canceled);
    assert!(!conn.is_closed());

    let ctx = Context::background().with_timeout(Duration::from_secs(5));
    let txn = conn.begin_txn(&ctx, None).await.unwrap();
    P::write(&txn, json!("after-cancel")).unwrap();
    txn.commit(&ctx).await.unwrap();
    conn.close().await.unwrap();

    assert_eq!(pool.committed(), vec![json!("after-cancel")]);
}

/// Runs every check in this module.
pub async fn run_conformance_suite<P: TestablePool>() {
    check_conn_after_close_fails::<P>().await;
    check_canceled_conn_leaves_pool_unchanged::<P>().await;
    check_waiter_gets_released_slot::<P>().await;
    check_pool_begin_txn_waits_for_slot::<P>().await;
    check_double_resolve_fails::<P>().await;
    check_conn_close_waits_for_txn::<P>().await;
    check_commit_visible_rollback_invisible::<P>().await;
    scenario_commit_round_trip::<P>().await;
    scenario_rollback_discards::<P>().await;
    scenario_canceled_begin_keeps_conn::<P>().await;
}

// ============================================================================
// Memory Backend
// ============================================================================

#[cfg(feature = "memory")]
mod memory {
    use serde_json::Value;
    use storage_api::backends::memory::{MemStack, MemStackPool};
    use storage_api::config::PoolConfig;
    use storage_api::error::StorageResult;

    use super::{ConnTxn, TestablePool};

    impl TestablePool for MemStackPool {
        fn open_fresh(config: PoolConfig) -> StorageResult<Self> {
            MemStackPool::open(MemStack::new(), config)
        }

        fn write(txn: &ConnTxn<Self>, value: Value) -> StorageResult<()> {
            txn.push(value)
        }

        fn read_latest(txn: &ConnTxn<Self>) -> StorageResult<Option<Value>> {
            txn.peek()
        }

        fn committed(&self) -> Vec<Value> {
            self.store().snapshot()
        }
    }
}
