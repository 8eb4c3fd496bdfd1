//! One-statement convenience operations.
//!
//! Each of these runs a single statement in its own transaction on a pooled
//! connection, with the commit/rollback handling of
//! [`TransactionScope`](crate::TransactionScope).

use crate::connection::{ConnectionFactory, Cursor};
use crate::error::PoolError;
use crate::pool::Pool;
use crate::stream::RowStream;
use crate::transaction::{CursorOf, ParamOf, QueryOptions, RowOf, TransactionScope};

impl<F: ConnectionFactory> Pool<F> {
    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, statement: &str, params: &[ParamOf<F>]) -> Result<u64, PoolError> {
        self.execute_with(QueryOptions::default(), statement, params)
            .await
    }

    /// Execute a statement with explicit options.
    pub async fn execute_with(
        &self,
        options: QueryOptions,
        statement: &str,
        params: &[ParamOf<F>],
    ) -> Result<u64, PoolError> {
        let mut scope = self.begin(options.isolation_level).await?;
        let result = async {
            let cursor = run(&mut scope, &options, statement, params).await?;
            Ok::<_, PoolError>(cursor.row_count())
        }
        .await;
        scope.finish(result).await
    }

    /// Run a query and return its first row.
    pub async fn fetch_one(
        &self,
        statement: &str,
        params: &[ParamOf<F>],
    ) -> Result<Option<RowOf<F>>, PoolError> {
        self.fetch_one_with(QueryOptions::default(), statement, params)
            .await
    }

    /// Run a query with explicit options and return its first row.
    pub async fn fetch_one_with(
        &self,
        options: QueryOptions,
        statement: &str,
        params: &[ParamOf<F>],
    ) -> Result<Option<RowOf<F>>, PoolError> {
        let mut scope = self.begin(options.isolation_level).await?;
        let result = async {
            let mut cursor = run(&mut scope, &options, statement, params).await?;
            cursor.fetch_one().await.map_err(PoolError::driver)
        }
        .await;
        scope.finish(result).await
    }

    /// Run a query and return all of its rows.
    pub async fn fetch_all(
        &self,
        statement: &str,
        params: &[ParamOf<F>],
    ) -> Result<Vec<RowOf<F>>, PoolError> {
        self.fetch_all_with(QueryOptions::default(), statement, params)
            .await
    }

    /// Run a query with explicit options and return all of its rows.
    pub async fn fetch_all_with(
        &self,
        options: QueryOptions,
        statement: &str,
        params: &[ParamOf<F>],
    ) -> Result<Vec<RowOf<F>>, PoolError> {
        let mut scope = self.begin(options.isolation_level).await?;
        let result = async {
            let mut cursor = run(&mut scope, &options, statement, params).await?;
            cursor.fetch_all().await.map_err(PoolError::driver)
        }
        .await;
        scope.finish(result).await
    }

    /// Run a query and stream its rows.
    ///
    /// The connection is acquired and the statement executed before this
    /// returns; rows are then fetched batch by batch as the stream is read.
    /// See [`RowStream`] for when the transaction ends.
    pub async fn fetch_iter(
        &self,
        statement: &str,
        params: &[ParamOf<F>],
    ) -> Result<RowStream<F>, PoolError> {
        self.fetch_iter_with(QueryOptions::default(), statement, params)
            .await
    }

    /// Run a query with explicit options and stream its rows.
    pub async fn fetch_iter_with(
        &self,
        options: QueryOptions,
        statement: &str,
        params: &[ParamOf<F>],
    ) -> Result<RowStream<F>, PoolError> {
        let mut scope = self.begin(options.isolation_level).await?;
        match run(&mut scope, &options, statement, params).await {
            Ok(cursor) => Ok(RowStream::new(scope, cursor)),
            Err(e) => Err(scope.fail(e).await),
        }
    }
}

async fn run<F: ConnectionFactory>(
    scope: &mut TransactionScope<F>,
    options: &QueryOptions,
    statement: &str,
    params: &[ParamOf<F>],
) -> Result<CursorOf<F>, PoolError> {
    let mut cursor = scope.cursor(&options.cursor).await?;
    tracing::trace!(statement, "executing statement");
    cursor
        .execute(statement, params)
        .await
        .map_err(PoolError::driver)?;
    Ok(cursor)
}
