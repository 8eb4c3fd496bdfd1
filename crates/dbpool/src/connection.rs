//! Driver capabilities the pool is built on.
//!
//! The pool never speaks a wire protocol itself. A driver plugs in by
//! implementing [`Connection`] and [`Cursor`] for its handle types, and the
//! pool is handed a [`ConnectionFactory`] that opens new handles.
//!
//! Traits use `#[async_trait]` so their futures are `Send`; the pool moves
//! connections into spawned tasks when a transaction scope is abandoned.

use std::future::Future;
use std::num::NonZeroUsize;

use async_trait::async_trait;

use crate::isolation::IsolationLevel;

/// A live database connection handle.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Cursor type produced by [`Connection::cursor`].
    type Cursor: Cursor<Error = Self::Error>;

    /// Driver error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Whether the underlying connection is still open.
    ///
    /// This is a cheap local check; it must not perform I/O.
    fn is_connected(&self) -> bool;

    /// The isolation level currently in effect.
    fn isolation_level(&self) -> IsolationLevel;

    /// Change the isolation level for subsequent transactions.
    async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), Self::Error>;

    /// Open a cursor on this connection.
    async fn cursor(&mut self, options: &CursorOptions) -> Result<Self::Cursor, Self::Error>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<(), Self::Error>;

    /// Roll back the current transaction.
    async fn rollback(&mut self) -> Result<(), Self::Error>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), Self::Error>;
}

/// A statement cursor.
#[async_trait]
pub trait Cursor: Send + 'static {
    /// Row type yielded by the fetch methods.
    type Row: Send + 'static;

    /// Statement parameter type.
    type Param: Sync;

    /// Driver error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Execute a statement.
    async fn execute(&mut self, statement: &str, params: &[Self::Param])
    -> Result<(), Self::Error>;

    /// Number of rows affected by the last statement.
    fn row_count(&self) -> u64;

    /// Fetch the next row, if any.
    async fn fetch_one(&mut self) -> Result<Option<Self::Row>, Self::Error>;

    /// Fetch every remaining row.
    async fn fetch_all(&mut self) -> Result<Vec<Self::Row>, Self::Error>;

    /// Fetch the next batch of rows. An empty batch means the result set is
    /// exhausted.
    async fn fetch_many(&mut self) -> Result<Vec<Self::Row>, Self::Error>;
}

/// Options used when opening a cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorOptions {
    /// Rows per [`Cursor::fetch_many`] batch. `None` uses the driver default.
    pub array_size: Option<NonZeroUsize>,
}

impl CursorOptions {
    /// Create cursor options with driver defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fetch batch size.
    #[must_use]
    pub fn array_size(mut self, size: NonZeroUsize) -> Self {
        self.array_size = Some(size);
        self
    }
}

/// Opens new connections on behalf of the pool.
///
/// Factories carry whatever configuration the driver needs (connection
/// string, credentials, timeouts). A failure is handed straight back to the
/// caller that triggered the creation; the pool does not retry.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Connection type produced by this factory.
    type Connection: Connection;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, <Self::Connection as Connection>::Error>;
}

/// A [`ConnectionFactory`] backed by a closure.
///
/// ```rust,ignore
/// let conn_str = "Server=db;Database=app".to_string();
/// let factory = ConnectFn::new(move || {
///     let conn_str = conn_str.clone();
///     async move { MyDriver::connect(&conn_str).await }
/// });
/// let pool = Pool::new(factory, PoolConfig::new().max_size(10))?;
/// ```
pub struct ConnectFn<F> {
    connect: F,
}

impl<F> ConnectFn<F> {
    /// Wrap a connect closure.
    pub fn new(connect: F) -> Self {
        Self { connect }
    }
}

#[async_trait]
impl<F, Fut, C> ConnectionFactory for ConnectFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<C, C::Error>> + Send + 'static,
    C: Connection,
{
    type Connection = C;

    async fn connect(&self) -> Result<C, C::Error> {
        (self.connect)().await
    }
}
