//! In-memory mock driver.
//!
//! Every connection opened through a [`MockDriver`] shares the driver's
//! scripted responses and call log, so a test can assert exactly which
//! commits, rollbacks, isolation changes and closes the pool performed.
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool::{Pool, PoolConfig};
//! use dbpool_testing::{MockCall, MockDriver, MockResponse, Value};
//!
//! let driver = MockDriver::builder()
//!     .with_response("SELECT id FROM users", MockResponse::rows(vec![
//!         vec![Value::Int(1)],
//!         vec![Value::Int(2)],
//!     ]))
//!     .build();
//!
//! let pool = Pool::new(driver.factory(), PoolConfig::new().max_size(2))?;
//! let rows = pool.fetch_all("SELECT id FROM users", &[]).await?;
//! assert_eq!(rows.len(), 2);
//! assert_eq!(driver.count(MockCall::Commit), 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dbpool::{Connection, ConnectionFactory, Cursor, CursorOptions, IsolationLevel};
use parking_lot::Mutex;
use thiserror::Error;

/// Rows per `fetch_many` batch when the cursor options don't say.
pub const DEFAULT_ARRAY_SIZE: usize = 1;

/// Error type for mock driver operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockError {
    /// The connection is closed.
    #[error("connection is closed")]
    Disconnected,

    /// Opening a connection failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A scripted statement failure.
    #[error("statement failed: {0}")]
    Statement(String),

    /// A scripted failure of a connection operation.
    #[error("{0} failed")]
    Operation(&'static str),
}

/// A scalar value, used both for row cells and statement parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Integer value.
    Int(i64),
    /// String value.
    Text(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

/// A row returned by the mock driver.
pub type Row = Vec<Value>;

/// Scripted outcome of a statement.
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    rows: Vec<Row>,
    affected: u64,
    error: Option<String>,
    disconnect: bool,
    fetch_failure: Option<FetchFailure>,
}

/// What happens once a cursor runs out of scripted rows.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FetchFailure {
    Error(String),
    Disconnect,
}

impl MockResponse {
    /// A statement returning rows.
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            affected: rows.len() as u64,
            rows,
            ..Self::default()
        }
    }

    /// A statement affecting `count` rows.
    pub fn affected(count: u64) -> Self {
        Self {
            affected: count,
            ..Self::default()
        }
    }

    /// A statement that fails with `message`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Drop the connection right after the statement completes.
    #[must_use]
    pub fn then_disconnect(mut self) -> Self {
        self.disconnect = true;
        self
    }

    /// Fail the `fetch_many` that comes after the last row with `message`.
    #[must_use]
    pub fn then_fail_fetch(mut self, message: impl Into<String>) -> Self {
        self.fetch_failure = Some(FetchFailure::Error(message.into()));
        self
    }

    /// Drop the connection on the `fetch_many` that comes after the last row.
    #[must_use]
    pub fn then_disconnect_on_fetch(mut self) -> Self {
        self.fetch_failure = Some(FetchFailure::Disconnect);
        self
    }
}

/// A call made on a mock connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// Connection opened.
    Connect,
    /// Isolation level changed.
    SetIsolationLevel(IsolationLevel),
    /// Cursor opened.
    Cursor,
    /// Statement executed.
    Execute(String),
    /// Transaction committed.
    Commit,
    /// Transaction rolled back.
    Rollback,
    /// Connection closed.
    Close,
}

/// One entry of the call log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockEvent {
    /// Id of the connection the call was made on.
    pub connection: u64,
    /// The call.
    pub call: MockCall,
}

struct Shared {
    responses: HashMap<String, MockResponse>,
    initial_isolation: IsolationLevel,
    connect_delay: Option<Duration>,
    rollback_delay: Option<Duration>,
    connect_failures: AtomicUsize,
    fail_rollback: AtomicBool,
    fail_close: AtomicBool,
    fail_set_isolation: AtomicBool,
    next_id: AtomicU64,
    log: Mutex<Vec<MockEvent>>,
    links: Mutex<HashMap<u64, Arc<AtomicBool>>>,
}

impl Shared {
    fn record(&self, connection: u64, call: MockCall) {
        tracing::trace!(connection, ?call, "mock driver call");
        self.log.lock().push(MockEvent { connection, call });
    }
}

/// Builder for [`MockDriver`].
#[derive(Default)]
pub struct MockDriverBuilder {
    responses: HashMap<String, MockResponse>,
    initial_isolation: IsolationLevel,
    connect_delay: Option<Duration>,
    rollback_delay: Option<Duration>,
    connect_failures: usize,
}

impl MockDriverBuilder {
    /// Script the response to a statement.
    #[must_use]
    pub fn with_response(mut self, statement: impl Into<String>, response: MockResponse) -> Self {
        self.responses.insert(statement.into(), response);
        self
    }

    /// Isolation level new connections start with.
    #[must_use]
    pub fn initial_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.initial_isolation = level;
        self
    }

    /// Sleep this long inside every connect.
    #[must_use]
    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Sleep this long inside every rollback, before it takes effect.
    #[must_use]
    pub fn rollback_delay(mut self, delay: Duration) -> Self {
        self.rollback_delay = Some(delay);
        self
    }

    /// Make the next `count` connects fail.
    #[must_use]
    pub fn fail_connects(mut self, count: usize) -> Self {
        self.connect_failures = count;
        self
    }

    /// Build the driver.
    pub fn build(self) -> MockDriver {
        MockDriver {
            shared: Arc::new(Shared {
                responses: self.responses,
                initial_isolation: self.initial_isolation,
                connect_delay: self.connect_delay,
                rollback_delay: self.rollback_delay,
                connect_failures: AtomicUsize::new(self.connect_failures),
                fail_rollback: AtomicBool::new(false),
                fail_close: AtomicBool::new(false),
                fail_set_isolation: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                log: Mutex::new(Vec::new()),
                links: Mutex::new(HashMap::new()),
            }),
        }
    }
}

/// A scripted in-memory database driver.
#[derive(Clone)]
pub struct MockDriver {
    shared: Arc<Shared>,
}

impl MockDriver {
    /// Create a new builder.
    pub fn builder() -> MockDriverBuilder {
        MockDriverBuilder::default()
    }

    /// A connection factory opening mock connections.
    pub fn factory(&self) -> MockFactory {
        MockFactory {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Make every rollback fail from now on (or stop doing so).
    pub fn fail_rollback(&self, enabled: bool) {
        self.shared.fail_rollback.store(enabled, Ordering::SeqCst);
    }

    /// Make every close fail from now on (or stop doing so).
    pub fn fail_close(&self, enabled: bool) {
        self.shared.fail_close.store(enabled, Ordering::SeqCst);
    }

    /// Make every isolation level change fail from now on (or stop doing so).
    pub fn fail_set_isolation_level(&self, enabled: bool) {
        self.shared.fail_set_isolation.store(enabled, Ordering::SeqCst);
    }

    /// Make the next `count` connects fail.
    pub fn fail_connects(&self, count: usize) {
        self.shared.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Drop the link of connection `id`, wherever it currently is.
    pub fn disconnect(&self, id: u64) {
        if let Some(link) = self.shared.links.lock().get(&id) {
            link.store(false, Ordering::SeqCst);
        }
    }

    /// Number of connections opened so far.
    pub fn connections_opened(&self) -> u64 {
        self.shared.next_id.load(Ordering::SeqCst) - 1
    }

    /// A copy of the call log.
    pub fn events(&self) -> Vec<MockEvent> {
        self.shared.log.lock().clone()
    }

    /// Number of times `call` was made on any connection.
    pub fn count(&self, call: MockCall) -> usize {
        self.shared
            .log
            .lock()
            .iter()
            .filter(|e| e.call == call)
            .count()
    }

    /// Calls made on connection `id`, in order.
    pub fn calls_on(&self, id: u64) -> Vec<MockCall> {
        self.shared
            .log
            .lock()
            .iter()
            .filter(|e| e.connection == id)
            .map(|e| e.call.clone())
            .collect()
    }
}

/// Connection factory for [`MockDriver`].
pub struct MockFactory {
    shared: Arc<Shared>,
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    async fn connect(&self) -> Result<MockConnection, MockError> {
        if let Some(delay) = self.shared.connect_delay {
            tokio::time::sleep(delay).await;
        }

        let failed = self
            .shared
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(MockError::Connect("scripted connect failure".into()));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let link = Arc::new(AtomicBool::new(true));
        self.shared.links.lock().insert(id, Arc::clone(&link));
        self.shared.record(id, MockCall::Connect);

        Ok(MockConnection {
            id,
            link,
            isolation: self.shared.initial_isolation,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// A mock connection.
pub struct MockConnection {
    id: u64,
    link: Arc<AtomicBool>,
    isolation: IsolationLevel,
    shared: Arc<Shared>,
}

impl MockConnection {
    /// Id of this connection, starting at 1 in open order.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Drop the link.
    pub fn disconnect(&self) {
        self.link.store(false, Ordering::SeqCst);
    }

    fn ensure_connected(&self) -> Result<(), MockError> {
        if self.link.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MockError::Disconnected)
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    type Cursor = MockCursor;
    type Error = MockError;

    fn is_connected(&self) -> bool {
        self.link.load(Ordering::SeqCst)
    }

    fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), MockError> {
        self.ensure_connected()?;
        self.shared
            .record(self.id, MockCall::SetIsolationLevel(level));
        if self.shared.fail_set_isolation.load(Ordering::SeqCst) {
            return Err(MockError::Operation("set isolation level"));
        }
        self.isolation = level;
        Ok(())
    }

    async fn cursor(&mut self, options: &CursorOptions) -> Result<MockCursor, MockError> {
        self.ensure_connected()?;
        self.shared.record(self.id, MockCall::Cursor);
        Ok(MockCursor {
            connection: self.id,
            link: Arc::clone(&self.link),
            shared: Arc::clone(&self.shared),
            array_size: options
                .array_size
                .map_or(DEFAULT_ARRAY_SIZE, NonZeroUsize::get),
            pending: VecDeque::new(),
            row_count: 0,
            fetch_failure: None,
        })
    }

    async fn commit(&mut self) -> Result<(), MockError> {
        self.ensure_connected()?;
        self.shared.record(self.id, MockCall::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), MockError> {
        self.ensure_connected()?;
        if let Some(delay) = self.shared.rollback_delay {
            tokio::time::sleep(delay).await;
        }
        self.shared.record(self.id, MockCall::Rollback);
        if self.shared.fail_rollback.load(Ordering::SeqCst) {
            return Err(MockError::Operation("rollback"));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MockError> {
        self.shared.record(self.id, MockCall::Close);
        self.link.store(false, Ordering::SeqCst);
        if self.shared.fail_close.load(Ordering::SeqCst) {
            return Err(MockError::Operation("close"));
        }
        Ok(())
    }
}

/// A mock cursor.
pub struct MockCursor {
    connection: u64,
    link: Arc<AtomicBool>,
    shared: Arc<Shared>,
    array_size: usize,
    pending: VecDeque<Row>,
    row_count: u64,
    fetch_failure: Option<FetchFailure>,
}

#[async_trait]
impl Cursor for MockCursor {
    type Row = Row;
    type Param = Value;
    type Error = MockError;

    async fn execute(&mut self, statement: &str, _params: &[Value]) -> Result<(), MockError> {
        if !self.link.load(Ordering::SeqCst) {
            return Err(MockError::Disconnected);
        }
        self.shared
            .record(self.connection, MockCall::Execute(statement.to_string()));

        let response = self
            .shared
            .responses
            .get(statement)
            .cloned()
            .unwrap_or_default();

        if response.disconnect {
            self.link.store(false, Ordering::SeqCst);
        }
        if let Some(message) = response.error {
            return Err(MockError::Statement(message));
        }

        self.row_count = response.affected;
        self.pending = response.rows.into();
        self.fetch_failure = response.fetch_failure;
        Ok(())
    }

    fn row_count(&self) -> u64 {
        self.row_count
    }

    async fn fetch_one(&mut self) -> Result<Option<Row>, MockError> {
        Ok(self.pending.pop_front())
    }

    async fn fetch_all(&mut self) -> Result<Vec<Row>, MockError> {
        Ok(self.pending.drain(..).collect())
    }

    async fn fetch_many(&mut self) -> Result<Vec<Row>, MockError> {
        if self.pending.is_empty() {
            match self.fetch_failure.take() {
                Some(FetchFailure::Error(message)) => return Err(MockError::Statement(message)),
                Some(FetchFailure::Disconnect) => {
                    self.link.store(false, Ordering::SeqCst);
                    return Err(MockError::Disconnected);
                }
                None => {}
            }
        }
        let n = self.array_size.min(self.pending.len());
        Ok(self.pending.drain(..n).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_assigns_sequential_ids() {
        let driver = MockDriver::builder().build();
        let factory = driver.factory();

        let a = factory.connect().await.unwrap();
        let b = factory.connect().await.unwrap();

        assert_eq!((a.id(), b.id()), (1, 2));
        assert_eq!(driver.connections_opened(), 2);
        assert_eq!(driver.count(MockCall::Connect), 2);
    }

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let driver = MockDriver::builder().fail_connects(1).build();
        let factory = driver.factory();

        assert!(factory.connect().await.is_err());
        assert!(factory.connect().await.is_ok());
        assert_eq!(driver.connections_opened(), 1);
    }

    #[tokio::test]
    async fn test_fetch_many_respects_array_size() {
        let driver = MockDriver::builder()
            .with_response(
                "SELECT n",
                MockResponse::rows(vec![
                    vec![Value::Int(1)],
                    vec![Value::Int(2)],
                    vec![Value::Int(3)],
                ]),
            )
            .build();
        let mut conn = driver.factory().connect().await.unwrap();
        let options = CursorOptions::new().array_size(NonZeroUsize::new(2).unwrap());
        let mut cursor = conn.cursor(&options).await.unwrap();

        cursor.execute("SELECT n", &[]).await.unwrap();
        assert_eq!(cursor.fetch_many().await.unwrap().len(), 2);
        assert_eq!(cursor.fetch_many().await.unwrap().len(), 1);
        assert!(cursor.fetch_many().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_after_statement() {
        let driver = MockDriver::builder()
            .with_response("INSERT", MockResponse::affected(1).then_disconnect())
            .build();
        let mut conn = driver.factory().connect().await.unwrap();
        let mut cursor = conn.cursor(&CursorOptions::new()).await.unwrap();

        cursor.execute("INSERT", &[]).await.unwrap();
        assert_eq!(cursor.row_count(), 1);
        assert!(!conn.is_connected());
        assert_eq!(conn.commit().await, Err(MockError::Disconnected));
    }

    #[tokio::test]
    async fn test_fetch_failure_after_last_row() {
        let driver = MockDriver::builder()
            .with_response(
                "SELECT n",
                MockResponse::rows(vec![vec![Value::Int(1)]]).then_disconnect_on_fetch(),
            )
            .build();
        let mut conn = driver.factory().connect().await.unwrap();
        let mut cursor = conn.cursor(&CursorOptions::new()).await.unwrap();

        cursor.execute("SELECT n", &[]).await.unwrap();
        assert_eq!(cursor.fetch_many().await.unwrap().len(), 1);
        assert_eq!(cursor.fetch_many().await, Err(MockError::Disconnected));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_driver_disconnect_by_id() {
        let driver = MockDriver::builder().build();
        let conn = driver.factory().connect().await.unwrap();

        driver.disconnect(conn.id());
        assert!(!conn.is_connected());
    }
}
