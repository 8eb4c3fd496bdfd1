//! Lazily fetched result sets.

use std::collections::VecDeque;

use futures_core::Stream;

use crate::connection::{ConnectionFactory, Cursor};
use crate::error::PoolError;
use crate::transaction::{CursorOf, RowOf, TransactionScope};

/// Rows of a query, fetched in batches as they are consumed.
///
/// The transaction the query runs in stays open, and its connection stays
/// checked out, until the last row has been read. At that point the
/// transaction is committed and the connection returns to the pool.
/// Closing the stream early rolls the transaction back; so does dropping it.
///
/// # Example
///
/// ```rust,ignore
/// let mut rows = pool.fetch_iter("SELECT * FROM large_table", &[]).await?;
///
/// while let Some(row) = rows.try_next().await? {
///     process_row(&row);
/// }
/// ```
pub struct RowStream<F: ConnectionFactory> {
    scope: Option<TransactionScope<F>>,
    cursor: Option<CursorOf<F>>,
    buffered: VecDeque<RowOf<F>>,
}

impl<F: ConnectionFactory> RowStream<F> {
    pub(crate) fn new(scope: TransactionScope<F>, cursor: CursorOf<F>) -> Self {
        Self {
            scope: Some(scope),
            cursor: Some(cursor),
            buffered: VecDeque::new(),
        }
    }

    /// Fetch the next row.
    ///
    /// Returns `Ok(None)` once the result set is exhausted; the transaction
    /// has been committed by then. A fetch error ends the transaction as a
    /// failed unit of work and is returned; the stream yields nothing more.
    pub async fn try_next(&mut self) -> Result<Option<RowOf<F>>, PoolError> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                return Ok(Some(row));
            }

            let Some(cursor) = self.cursor.as_mut() else {
                return Ok(None);
            };

            match cursor.fetch_many().await {
                Ok(batch) if batch.is_empty() => {
                    self.cursor = None;
                    if let Some(scope) = self.scope.take() {
                        scope.commit().await?;
                    }
                    return Ok(None);
                }
                Ok(batch) => self.buffered.extend(batch),
                Err(e) => {
                    self.cursor = None;
                    let err = PoolError::driver(e);
                    return Err(match self.scope.take() {
                        Some(scope) => scope.fail(err).await,
                        None => err,
                    });
                }
            }
        }
    }

    /// Whether the result set has been fully consumed or abandoned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.cursor.is_none() && self.buffered.is_empty()
    }

    /// Stop reading and roll the transaction back.
    ///
    /// Does nothing if the stream has already finished.
    pub async fn close(mut self) -> Result<(), PoolError> {
        self.cursor = None;
        self.buffered.clear();
        match self.scope.take() {
            Some(scope) => scope.rollback().await,
            None => Ok(()),
        }
    }

    /// Collect all remaining rows into a vector.
    ///
    /// This consumes the stream and loads all rows into memory.
    pub async fn collect_all(mut self) -> Result<Vec<RowOf<F>>, PoolError> {
        let mut rows = Vec::new();
        while let Some(row) = self.try_next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Adapt into a [`Stream`] of rows.
    pub fn into_stream(self) -> impl Stream<Item = Result<RowOf<F>, PoolError>> + Send {
        futures_util::stream::try_unfold(self, |mut rows| async move {
            Ok(rows.try_next().await?.map(|row| (row, rows)))
        })
    }
}
