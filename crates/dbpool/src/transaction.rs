//! Transaction scopes.
//!
//! A [`TransactionScope`] owns one checked-out connection for the length of
//! one unit of work. Every scope ends in exactly one of three ways:
//!
//! - **commit**: the work succeeded and the connection is still open; the
//!   connection goes back to the pool.
//! - **rollback**: the work failed on a live connection; after a successful
//!   rollback the connection goes back to the pool.
//! - **discard**: the connection dropped, or rolling back failed; the
//!   connection is never reused. A dropped connection also drains the pool's
//!   idle queue, since its siblings are likely gone too.
//!
//! The caller's own error always wins. A rollback failure while unwinding is
//! handed to [`PoolConfig::on_rollback_error`](crate::PoolConfig) instead.

use futures_core::future::BoxFuture;

use crate::connection::{Connection, ConnectionFactory, Cursor, CursorOptions};
use crate::error::PoolError;
use crate::isolation::IsolationLevel;
use crate::pool::{Pool, PooledConnection};

/// Connection type of a factory.
pub type ConnectionOf<F> = <F as ConnectionFactory>::Connection;

/// Cursor type of a factory's connections.
pub type CursorOf<F> = <ConnectionOf<F> as Connection>::Cursor;

/// Row type of a factory's cursors.
pub type RowOf<F> = <CursorOf<F> as Cursor>::Row;

/// Statement parameter type of a factory's cursors.
pub type ParamOf<F> = <CursorOf<F> as Cursor>::Param;

/// Options for a scoped query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Isolation level to run the transaction at.
    ///
    /// `None` keeps whatever level the connection already has.
    pub isolation_level: Option<IsolationLevel>,
    /// Options for the cursor the statement runs on.
    pub cursor: CursorOptions,
}

impl QueryOptions {
    /// Create options that use the connection's current settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run at the given isolation level.
    #[must_use]
    pub fn isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Set the cursor options.
    #[must_use]
    pub fn cursor(mut self, options: CursorOptions) -> Self {
        self.cursor = options;
        self
    }
}

/// A connection bound to one transaction.
///
/// Obtained from [`Pool::begin`]. End it with [`commit`](Self::commit),
/// [`rollback`](Self::rollback) or [`finish`](Self::finish). If it is
/// dropped instead, for example because the owning task was cancelled, the
/// transaction is rolled back on a background task and the connection is
/// returned to the pool. Outside a tokio runtime the connection is discarded.
pub struct TransactionScope<F: ConnectionFactory> {
    pool: Pool<F>,
    conn: Option<PooledConnection<F>>,
    restore_isolation: Option<IsolationLevel>,
    background: bool,
}

impl<F: ConnectionFactory> TransactionScope<F> {
    async fn begin(pool: &Pool<F>, isolation: Option<IsolationLevel>) -> Result<Self, PoolError> {
        let conn = pool.acquire().await?;
        let mut scope = Self {
            pool: pool.clone(),
            conn: Some(conn),
            restore_isolation: None,
            background: false,
        };

        if let Some(level) = isolation {
            let current = scope.connection().isolation_level();
            if current != level {
                tracing::debug!(from = %current, to = %level, "changing isolation level");
                scope.restore_isolation = Some(current);
                if let Err(e) = scope.connection_mut().set_isolation_level(level).await {
                    return Err(scope.fail(PoolError::driver(e)).await);
                }
            }
        }

        Ok(scope)
    }

    /// The connection this transaction runs on.
    #[allow(clippy::expect_used)] // only `None` once the scope is consumed
    #[must_use]
    pub fn connection(&self) -> &ConnectionOf<F> {
        self.conn.as_ref().expect("transaction scope already finished")
    }

    /// The connection this transaction runs on.
    #[allow(clippy::expect_used)] // only `None` once the scope is consumed
    pub fn connection_mut(&mut self) -> &mut ConnectionOf<F> {
        self.conn.as_mut().expect("transaction scope already finished")
    }

    /// Open a cursor on the transaction's connection.
    pub async fn cursor(&mut self, options: &CursorOptions) -> Result<CursorOf<F>, PoolError> {
        self.connection_mut()
            .cursor(options)
            .await
            .map_err(PoolError::driver)
    }

    /// Commit the transaction and return the connection to the pool.
    ///
    /// Fails with [`PoolError::CommitOnClosedConnection`] if the connection
    /// has already dropped. On any failure the connection is handled as for
    /// a failed unit of work.
    pub async fn commit(self) -> Result<(), PoolError> {
        self.finish(Ok(())).await
    }

    /// Roll back the transaction and return the connection to the pool.
    ///
    /// If the connection has dropped there is nothing to roll back; it is
    /// abandoned and the pool's idle connections are drained. A rollback
    /// error is returned and the connection is discarded.
    pub async fn rollback(mut self) -> Result<(), PoolError> {
        self.unwind().await
    }

    /// End the transaction according to the outcome of the work done in it.
    ///
    /// `Ok` commits, `Err` rolls back. The work's error is returned
    /// unchanged; a commit failure is returned in its place when the work
    /// itself succeeded.
    pub async fn finish<T, E>(mut self, result: Result<T, E>) -> Result<T, E>
    where
        E: From<PoolError>,
    {
        match result {
            Ok(value) => match self.commit_inner().await {
                Ok(()) => {
                    self.cleanup().await;
                    Ok(value)
                }
                Err(e) => Err(self.fail(E::from(e)).await),
            },
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn commit_inner(&mut self) -> Result<(), PoolError> {
        let conn = self.connection_mut();
        if !conn.is_connected() {
            return Err(PoolError::CommitOnClosedConnection);
        }
        conn.commit().await.map_err(PoolError::driver)
    }

    /// Unwind after a fault, then hand the fault back.
    pub(crate) async fn fail<E>(mut self, err: E) -> E {
        if let Err(e) = self.unwind().await {
            (self.pool.config().on_rollback_error)(&e);
        }
        err
    }

    // The connection stays in `self.conn` across every await below, so a
    // cancelled caller leaves it to `Drop` instead of the idle queue.
    async fn unwind(&mut self) -> Result<(), PoolError> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };

        if !conn.is_connected() {
            if let Some(conn) = self.conn.take() {
                abandon(&self.pool, conn).await;
            }
            return Ok(());
        }

        let rolled_back = conn.rollback().await;
        if let Err(e) = rolled_back {
            if let Some(conn) = self.conn.take() {
                conn.discard().await;
            }
            return Err(PoolError::driver(e));
        }

        self.cleanup().await;
        Ok(())
    }

    async fn cleanup(&mut self) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };

        if !conn.is_connected() {
            if let Some(conn) = self.conn.take() {
                conn.abandon();
            }
            return;
        }

        if let Some(level) = self.restore_isolation {
            let restored = conn.set_isolation_level(level).await;
            if let Err(e) = restored {
                tracing::warn!(error = %e, "failed to restore isolation level, discarding connection");
                if let Some(conn) = self.conn.take() {
                    conn.discard().await;
                }
                return;
            }
            self.restore_isolation = None;
        }

        if let Some(conn) = self.conn.take() {
            conn.release();
        }
    }
}

async fn abandon<F: ConnectionFactory>(pool: &Pool<F>, conn: PooledConnection<F>) {
    tracing::warn!("connection lost during transaction, draining idle connections");
    conn.abandon();
    pool.drain().await;
}

impl<F: ConnectionFactory> Drop for TransactionScope<F> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        // A cleanup task that is itself cancelled gives up on the connection.
        if self.background {
            tracing::warn!("transaction cleanup interrupted, abandoning connection");
            conn.abandon();
            return;
        }

        tracing::warn!("transaction scope dropped before completion, rolling back");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let scope = TransactionScope {
                    pool: self.pool.clone(),
                    conn: Some(conn),
                    restore_isolation: self.restore_isolation.take(),
                    background: true,
                };
                handle.spawn(async move {
                    scope.fail(()).await;
                });
            }
            Err(_) => conn.abandon(),
        }
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Start a transaction on a pooled connection.
    ///
    /// With `isolation` set to a level different from the connection's
    /// current one, that level is applied now and the previous level is put
    /// back before the connection returns to the pool. A level equal to the
    /// current one is left alone.
    pub async fn begin(
        &self,
        isolation: Option<IsolationLevel>,
    ) -> Result<TransactionScope<F>, PoolError> {
        TransactionScope::begin(self, isolation).await
    }

    /// Run `work` in a transaction.
    ///
    /// Commits when `work` returns `Ok`, rolls back when it returns `Err`,
    /// and returns the connection to the pool whenever it is still usable.
    /// See the [module documentation](crate::transaction) for how dropped connections and
    /// failed rollbacks are handled.
    ///
    /// ```rust,ignore
    /// let id = pool
    ///     .transaction(Some(IsolationLevel::Serializable), |conn| {
    ///         Box::pin(async move {
    ///             let mut cursor = conn.cursor(&CursorOptions::new()).await?;
    ///             cursor.execute("UPDATE counters SET n = n + 1", &[]).await?;
    ///             Ok::<_, MyError>(cursor.row_count())
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<T, E, W>(
        &self,
        isolation: Option<IsolationLevel>,
        work: W,
    ) -> Result<T, E>
    where
        W: for<'c> FnOnce(&'c mut ConnectionOf<F>) -> BoxFuture<'c, Result<T, E>> + Send,
        E: From<PoolError> + Send,
        T: Send,
    {
        let mut scope = self.begin(isolation).await?;
        let result = work(scope.connection_mut()).await;
        scope.finish(result).await
    }

    /// Run `work` against a cursor in a transaction.
    ///
    /// Behaves like [`transaction`](Self::transaction), with a cursor opened
    /// on the connection using `options.cursor`.
    pub async fn with_cursor<T, E, W>(&self, options: QueryOptions, work: W) -> Result<T, E>
    where
        W: for<'c> FnOnce(&'c mut CursorOf<F>) -> BoxFuture<'c, Result<T, E>> + Send,
        E: From<PoolError> + Send,
        T: Send,
    {
        let mut scope = self.begin(options.isolation_level).await?;
        let result = match scope.cursor(&options.cursor).await {
            Ok(mut cursor) => work(&mut cursor).await,
            Err(e) => Err(E::from(e)),
        };
        scope.finish(result).await
    }
}
