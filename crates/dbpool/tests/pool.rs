//! Acquisition, sizing and drain tests.
//!
//! These run against the in-memory mock driver from `dbpool-testing`:
//!
//! ```bash
//! cargo test -p dbpool --test pool
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use dbpool::{ConnectFn, Connection, ConnectionFactory, Pool, PoolConfig, PoolError};
use dbpool_testing::{MockCall, MockDriver, MockFactory};
use tokio_test::{assert_pending, assert_ready, assert_ready_err, assert_ready_ok};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn pool(driver: &MockDriver, max_size: u32) -> Pool<MockFactory> {
    init_tracing();
    Pool::new(driver.factory(), PoolConfig::new().max_size(max_size)).expect("valid config")
}

// =============================================================================
// Construction
// =============================================================================

#[test]
fn test_pool_rejects_zero_max_size() {
    let driver = MockDriver::builder().build();

    let result = Pool::new(driver.factory(), PoolConfig::new().max_size(0));

    assert!(matches!(result, Err(PoolError::Configuration(_))));
    assert_eq!(driver.connections_opened(), 0);
}

#[test]
fn test_pool_from_config_str() {
    let driver = MockDriver::builder().build();

    let config = PoolConfig::from_config_str("maxsize=4").unwrap();
    let pool = Pool::new(driver.factory(), config).unwrap();
    assert_eq!(pool.status().max, 4);

    assert!(matches!(
        PoolConfig::from_config_str("maxsize=lots"),
        Err(PoolError::Configuration(_))
    ));
    assert_eq!(driver.connections_opened(), 0);
}

#[tokio::test]
async fn test_pool_with_closure_factory() {
    let driver = MockDriver::builder().build();
    let source = driver.clone();
    let factory = ConnectFn::new(move || {
        let factory = source.factory();
        async move { factory.connect().await }
    });
    let pool = Pool::new(factory, PoolConfig::new().max_size(1)).unwrap();

    let affected = pool.execute("DELETE FROM t", &[]).await.unwrap();
    assert_eq!(affected, 0);
    assert_eq!(driver.connections_opened(), 1);
    assert_eq!(driver.count(MockCall::Commit), 1);
}

#[test]
fn test_new_pool_opens_nothing() {
    let driver = MockDriver::builder().build();
    let pool = pool(&driver, 5);

    let status = pool.status();
    assert_eq!(status.created, 0);
    assert_eq!(status.idle, 0);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.max, 5);
    assert_eq!(driver.connections_opened(), 0);
}

// =============================================================================
// Acquire / release
// =============================================================================

#[tokio::test]
async fn test_acquire_creates_then_reuses() {
    let driver = MockDriver::builder().build();
    let pool = pool(&driver, 5);

    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.id(), 1);
    assert_eq!(pool.status().in_use, 1);
    conn.release();

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, 1);

    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.id(), 1, "idle connection should be reused");
    assert_eq!(driver.connections_opened(), 1);
}

#[tokio::test]
async fn test_idle_connections_are_fifo() {
    let driver = MockDriver::builder().build();
    let pool = pool(&driver, 5);

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    drop(b);
    drop(a);

    assert_eq!(pool.acquire().await.unwrap().id(), 2);
}

#[tokio::test]
async fn test_acquire_waits_when_exhausted() {
    let driver = MockDriver::builder().build();
    let pool = pool(&driver, 1);

    let first = pool.acquire().await.unwrap();
    let mut waiter = tokio_test::task::spawn(pool.acquire());
    assert_pending!(waiter.poll());

    drop(first);

    assert!(waiter.is_woken());
    let second = assert_ready_ok!(waiter.poll());
    assert_eq!(second.id(), 1, "the returned connection is handed over");
    assert_eq!(driver.connections_opened(), 1);
}

#[tokio::test]
async fn test_try_acquire_never_creates() {
    let driver = MockDriver::builder().build();
    let pool = pool(&driver, 2);

    assert!(pool.try_acquire().is_none());
    assert_eq!(driver.connections_opened(), 0);

    drop(pool.acquire().await.unwrap());

    let conn = pool.try_acquire().expect("idle connection");
    assert_eq!(conn.id(), 1);
    assert!(pool.try_acquire().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_respects_max_size() {
    let driver = MockDriver::builder()
        .connect_delay(Duration::from_millis(2))
        .build();
    let pool = pool(&driver, 5);

    let in_use = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();

    for _ in 0..50 {
        let pool = pool.clone();
        let in_use = in_use.clone();
        let peak = peak.clone();

        handles.push(tokio::spawn(async move {
            let conn = pool.acquire().await.expect("acquire");
            let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1)).await;
            in_use.fetch_sub(1, Ordering::SeqCst);
            drop(conn);
        }));
    }

    for handle in handles {
        handle.await.expect("task panicked");
    }

    assert!(driver.connections_opened() <= 5);
    assert!(peak.load(Ordering::SeqCst) <= 5);

    let status = pool.status();
    assert!(status.created <= 5);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, status.created);
}

// =============================================================================
// Creation failures
// =============================================================================

#[tokio::test]
async fn test_factory_failure_releases_slot() {
    let driver = MockDriver::builder().fail_connects(1).build();
    let pool = pool(&driver, 1);

    let err = pool.acquire().await.err().expect("connect should fail");
    assert!(matches!(err, PoolError::ConnectionCreation(_)));
    assert_eq!(pool.status().created, 0);

    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.id(), 1);
    assert_eq!(pool.status().created, 1);
}

#[tokio::test]
async fn test_factory_failure_lets_waiter_create() {
    let driver = MockDriver::builder()
        .connect_delay(Duration::from_millis(20))
        .fail_connects(1)
        .build();
    let pool = pool(&driver, 1);

    let mut creator = tokio_test::task::spawn(pool.acquire());
    assert_pending!(creator.poll());

    let mut waiter = tokio_test::task::spawn(pool.acquire());
    assert_pending!(waiter.poll());

    tokio::time::sleep(Duration::from_millis(40)).await;
    let err = assert_ready_err!(creator.poll());
    assert!(matches!(err, PoolError::ConnectionCreation(_)));

    assert!(waiter.is_woken());
    assert_pending!(waiter.poll());
    tokio::time::sleep(Duration::from_millis(40)).await;
    let conn = assert_ready_ok!(waiter.poll());
    assert_eq!(conn.id(), 1);
}

#[tokio::test]
async fn test_cancelled_creation_releases_slot() {
    let driver = MockDriver::builder()
        .connect_delay(Duration::from_millis(50))
        .build();
    let pool = pool(&driver, 1);

    let mut creator = tokio_test::task::spawn(pool.acquire());
    assert_pending!(creator.poll());
    assert_eq!(pool.status().created, 1);

    drop(creator);
    assert_eq!(pool.status().created, 0);
}

// =============================================================================
// Discard and drain
// =============================================================================

#[tokio::test]
async fn test_drain_closes_only_idle_connections() {
    let driver = MockDriver::builder().build();
    let pool = pool(&driver, 3);

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    let held = pool.acquire().await.unwrap();
    drop(a);
    drop(b);

    assert_eq!(pool.drain().await, 2);
    assert_eq!(driver.count(MockCall::Close), 2);
    assert!(held.is_connected());
    assert!(!driver.calls_on(held.id()).contains(&MockCall::Close));

    let status = pool.status();
    assert_eq!(status.idle, 0);
    assert_eq!(status.in_use, 1);
}

#[tokio::test]
async fn test_drain_suppresses_close_errors() {
    let driver = MockDriver::builder().build();
    let pool = pool(&driver, 3);

    let a = pool.acquire().await.unwrap();
    let b = pool.acquire().await.unwrap();
    drop(a);
    drop(b);

    driver.fail_close(true);
    assert_eq!(pool.drain().await, 2);
    assert_eq!(driver.count(MockCall::Close), 2);
    assert_eq!(pool.status().idle, 0);
}

#[tokio::test]
async fn test_drain_is_idempotent() {
    let driver = MockDriver::builder().build();
    let pool = pool(&driver, 3);

    assert_eq!(pool.drain().await, 0);
    drop(pool.acquire().await.unwrap());
    assert_eq!(pool.drain().await, 1);
    assert_eq!(pool.drain().await, 0);
}

#[tokio::test]
async fn test_discarded_slot_is_kept_by_default() {
    let driver = MockDriver::builder().build();
    let pool = pool(&driver, 1);

    pool.acquire().await.unwrap().discard().await;
    assert_eq!(driver.count(MockCall::Close), 1);
    assert_eq!(pool.status().created, 1);

    let mut waiter = tokio_test::task::spawn(pool.acquire());
    assert_pending!(waiter.poll());
    assert_eq!(driver.connections_opened(), 1);
}

#[tokio::test]
async fn test_discarded_slot_is_reclaimed_when_enabled() {
    let driver = MockDriver::builder().build();
    let config = PoolConfig::new().max_size(1).reclaim_discarded_slots(true);
    let pool = Pool::new(driver.factory(), config).unwrap();

    let conn = pool.acquire().await.unwrap();
    let mut waiter = tokio_test::task::spawn(pool.acquire());
    assert_pending!(waiter.poll());

    conn.discard().await;
    assert!(waiter.is_woken());
    let conn = assert_ready!(waiter.poll()).unwrap();
    assert_eq!(conn.id(), 2);
    assert_eq!(pool.status().created, 1);
}

#[tokio::test]
async fn test_dead_connection_dropped_by_hand_is_caught_by_next_scope() {
    let driver = MockDriver::builder().build();
    let pool = pool(&driver, 2);

    let conn = pool.acquire().await.unwrap();
    conn.disconnect();
    drop(conn);
    assert_eq!(pool.status().idle, 1, "drop returns the connection as-is");

    let err = pool.execute("DELETE FROM t", &[]).await.unwrap_err();
    assert!(matches!(err, PoolError::Driver(_)));
    assert_eq!(driver.count(MockCall::Rollback), 0);

    let status = pool.status();
    assert_eq!(status.idle, 0);
    assert_eq!(status.in_use, 0);
}

#[tokio::test]
async fn test_abandon_keeps_dead_connection_out_of_pool() {
    let driver = MockDriver::builder().build();
    let pool = pool(&driver, 2);

    let conn = pool.acquire().await.unwrap();
    conn.disconnect();
    conn.abandon();

    let status = pool.status();
    assert_eq!(status.idle, 0);
    assert_eq!(status.in_use, 0);
    assert_eq!(pool.acquire().await.unwrap().id(), 2);
}

#[tokio::test]
async fn test_detach_takes_connection_out_of_pool() {
    let driver = MockDriver::builder().build();
    let pool = pool(&driver, 2);

    let conn = pool.acquire().await.unwrap().detach();
    assert_eq!(conn.id(), 1);

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, 0);
    assert_eq!(status.created, 1);
}
