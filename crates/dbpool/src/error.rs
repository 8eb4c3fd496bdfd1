//! Pool error types.

use thiserror::Error;

/// Boxed error produced by a driver.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// The connection factory failed to produce a connection.
    ///
    /// The creation slot reserved for this attempt has been released, so a
    /// later acquisition may try again.
    #[error("failed to create connection: {0}")]
    ConnectionCreation(#[source] BoxError),

    /// The caller's work completed, but the connection had already dropped
    /// before it could be committed.
    #[error("cannot commit because connection was closed")]
    CommitOnClosedConnection,

    /// The driver reported an error while executing a statement, committing,
    /// rolling back or changing connection state.
    #[error("driver error: {0}")]
    Driver(#[source] BoxError),
}

impl PoolError {
    /// Wrap a driver error.
    pub fn driver(err: impl Into<BoxError>) -> Self {
        Self::Driver(err.into())
    }

    /// Wrap a factory error.
    pub fn creation(err: impl Into<BoxError>) -> Self {
        Self::ConnectionCreation(err.into())
    }

    /// Check whether this error means the connection went away underneath
    /// the caller, as opposed to the statement itself failing.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::CommitOnClosedConnection)
    }
}
