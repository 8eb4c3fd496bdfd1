//! # dbpool
//!
//! A bounded, transactional pool of database connections.
//!
//! The pool is driver-agnostic: a driver implements [`Connection`] and
//! [`Cursor`], and the pool is given a [`ConnectionFactory`] to open new
//! connections with. On top of plain checkout it wraps work in transactions
//! that commit on success, roll back on failure, and keep connections that
//! have dropped out of circulation.
//!
//! ## Features
//!
//! - At most `max_size` connections are ever created; callers wait for a
//!   returned connection once that ceiling is reached
//! - Idle connections are reused in FIFO order
//! - Closure-based and explicit transaction scopes with per-scope isolation
//!   levels that are restored before the connection is reused
//! - Dead connections are never returned to the pool; losing one mid-use
//!   drains the remaining idle connections
//! - Rollback failures during error handling go to a configurable handler
//!   and never hide the original error
//! - Lazily fetched result sets that hold their transaction open until read
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbpool::{ConnectFn, IsolationLevel, Pool, PoolConfig, QueryOptions};
//!
//! let factory = ConnectFn::new(move || MyDriver::connect("Server=db;Database=app"));
//! let pool = Pool::new(factory, PoolConfig::new().max_size(20))?;
//!
//! let inserted = pool
//!     .execute("INSERT INTO jobs (name) VALUES (?)", &["nightly".into()])
//!     .await?;
//!
//! let options = QueryOptions::new().isolation_level(IsolationLevel::Serializable);
//! let mut rows = pool.fetch_iter_with(options, "SELECT * FROM jobs", &[]).await?;
//! while let Some(row) = rows.try_next().await? {
//!     // ...
//! }
//!
//! pool.drain().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod isolation;
pub mod pool;
mod query;
pub mod stream;
pub mod transaction;

pub use config::PoolConfig;
pub use connection::{ConnectFn, Connection, ConnectionFactory, Cursor, CursorOptions};
pub use error::PoolError;
pub use isolation::IsolationLevel;
pub use pool::{Pool, PoolStatus, PooledConnection};
pub use stream::RowStream;
pub use transaction::{QueryOptions, TransactionScope};
