//! Connection pool implementation.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionFactory};
use crate::error::PoolError;

/// A bounded pool of database connections.
///
/// The pool hands out idle connections first and only opens a new one while
/// fewer than [`PoolConfig::max_size`] connections have been created. Once
/// that ceiling is reached, callers wait until a connection is returned.
///
/// `Pool` is a cheap handle; clones share the same connections.
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Connection>>,
    available: Notify,
}

struct PoolState<C> {
    idle: VecDeque<C>,
    created: u32,
    in_use: u32,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a pool that opens connections with `factory`.
    ///
    /// No connection is opened until the first acquisition. Fails with
    /// [`PoolError::Configuration`] if `config` is invalid.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        tracing::debug!(max_size = config.max_size, "creating connection pool");

        Ok(Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    created: 0,
                    in_use: 0,
                }),
                available: Notify::new(),
            }),
        })
    }

    /// Get a connection from the pool.
    ///
    /// Returns an idle connection if there is one. Otherwise, if the pool has
    /// created fewer than `max_size` connections, opens a new one. Otherwise
    /// waits until another caller returns a connection.
    ///
    /// A factory failure is returned as [`PoolError::ConnectionCreation`] and
    /// is not retried.
    pub async fn acquire(&self) -> Result<PooledConnection<F>, PoolError> {
        tracing::trace!("acquiring connection from pool");

        let slot = loop {
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            // Register before looking at the queue so a release between the
            // check and the await is not lost.
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if let Some(conn) = state.idle.pop_front() {
                    state.in_use += 1;
                    return Ok(PooledConnection::new(self.clone(), conn));
                }
                if state.created < self.inner.config.max_size {
                    state.created += 1;
                    break CreationSlot::reserve(self);
                }
            }

            tracing::trace!("pool exhausted, waiting for a connection");
            notified.await;
        };

        match self.inner.factory.connect().await {
            Ok(conn) => {
                slot.fill();
                let created = {
                    let mut state = self.inner.state.lock();
                    state.in_use += 1;
                    state.created
                };
                tracing::debug!(created, "opened new connection");
                Ok(PooledConnection::new(self.clone(), conn))
            }
            Err(e) => {
                tracing::debug!(error = %e, "connection factory failed");
                drop(slot);
                Err(PoolError::creation(e))
            }
        }
    }

    /// Get an idle connection without waiting.
    ///
    /// Returns `None` if no connection is idle. Never opens a connection.
    pub fn try_acquire(&self) -> Option<PooledConnection<F>> {
        let mut state = self.inner.state.lock();
        let conn = state.idle.pop_front()?;
        state.in_use += 1;
        drop(state);
        Some(PooledConnection::new(self.clone(), conn))
    }

    /// Close every idle connection.
    ///
    /// Connections currently checked out are not affected. Errors from
    /// closing individual connections are ignored so one bad connection
    /// does not stop the rest from being closed. Safe to call on an empty
    /// pool. Returns the number of connections closed.
    pub async fn drain(&self) -> usize {
        let mut closed = 0;

        loop {
            let next = self.inner.state.lock().idle.pop_front();
            let Some(mut conn) = next else {
                break;
            };

            self.inner.forget(false);
            closed += 1;
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "error closing idle connection during drain");
            }
        }

        if closed > 0 {
            tracing::info!(closed, "drained idle connections");
        }
        closed
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len() as u32,
            in_use: state.in_use,
            created: state.created,
            max: self.inner.config.max_size,
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn release(&self, conn: F::Connection) {
        {
            let mut state = self.inner.state.lock();
            state.in_use = state.in_use.saturating_sub(1);
            state.idle.push_back(conn);
        }
        tracing::trace!("returning connection to pool");
        self.inner.available.notify_one();
    }
}

impl<F: ConnectionFactory> PoolInner<F> {
    /// Account for a connection that left the pool for good.
    fn forget(&self, was_in_use: bool) {
        let mut state = self.state.lock();
        if was_in_use {
            state.in_use = state.in_use.saturating_sub(1);
        }
        if self.config.reclaim_discarded_slots {
            state.created = state.created.saturating_sub(1);
            drop(state);
            self.available.notify_one();
        }
    }
}

/// A creation slot reserved while the factory is running.
///
/// Dropping an unfilled slot gives it back, which covers both factory
/// failure and cancellation of the acquiring task.
struct CreationSlot<'a, F: ConnectionFactory> {
    pool: &'a Pool<F>,
    filled: bool,
}

impl<'a, F: ConnectionFactory> CreationSlot<'a, F> {
    fn reserve(pool: &'a Pool<F>) -> Self {
        Self {
            pool,
            filled: false,
        }
    }

    fn fill(mut self) {
        self.filled = true;
    }
}

impl<F: ConnectionFactory> Drop for CreationSlot<'_, F> {
    fn drop(&mut self) {
        if self.filled {
            return;
        }
        {
            let mut state = self.pool.inner.state.lock();
            state.created = state.created.saturating_sub(1);
        }
        // A waiter may now create in our place.
        self.pool.inner.available.notify_one();
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub idle: u32,
    /// Number of connections currently checked out.
    pub in_use: u32,
    /// Number of creation slots in use.
    pub created: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

/// A connection checked out of the pool.
///
/// When dropped, the connection is returned to the pool as-is, whether or not
/// it is still connected. Use [`discard`](Self::discard) for a connection
/// that must not be reused, or [`abandon`](Self::abandon) for one that is
/// known to be dead. A dead connection that is simply dropped stays in
/// circulation until a transaction scope trips over it, abandons it and
/// drains the idle queue.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<F::Connection>,
    pool: Pool<F>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    fn new(pool: Pool<F>, conn: F::Connection) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    /// Return the connection to the pool.
    ///
    /// Equivalent to dropping it.
    pub fn release(self) {
        drop(self);
    }

    /// Close the connection instead of returning it to the pool.
    ///
    /// A close error is logged and otherwise ignored.
    pub async fn discard(mut self) {
        if let Some(mut conn) = self.conn.take() {
            self.pool.inner.forget(true);
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "error closing discarded connection");
            }
        }
    }

    /// Drop a connection that is already known to be dead.
    ///
    /// No I/O is attempted on it.
    pub fn abandon(mut self) {
        if self.conn.take().is_some() {
            tracing::warn!("abandoning disconnected connection");
            self.pool.inner.forget(true);
        }
    }

    /// Detach the connection from the pool.
    ///
    /// The pool treats it as discarded; it will not be returned on drop.
    pub fn detach(mut self) -> F::Connection {
        let conn = self.take();
        self.pool.inner.forget(true);
        conn
    }

    /// The pool this connection belongs to.
    #[must_use]
    pub fn pool(&self) -> &Pool<F> {
        &self.pool
    }

    #[allow(clippy::expect_used)] // only `None` once consumed by self-taking methods
    fn take(&mut self) -> F::Connection {
        self.conn.take().expect("pooled connection already taken")
    }
}

impl<F: ConnectionFactory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field(
                "connected",
                &self.conn.as_ref().map(Connection::is_connected),
            )
            .finish_non_exhaustive()
    }
}

/// Gives access to the driver connection.
///
/// Work done directly through it is not tracked by the pool. In particular,
/// if the connection drops while in use, check
/// [`is_connected`](Connection::is_connected) before letting it go back.
impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    #[allow(clippy::expect_used)] // only `None` once consumed by self-taking methods
    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("pooled connection already taken")
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    #[allow(clippy::expect_used)] // only `None` once consumed by self-taking methods
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("pooled connection already taken")
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

