//! Transaction isolation levels.

use std::fmt;

/// Transaction isolation level.
///
/// A transaction scope may request one of these for the duration of its
/// work; the connection's previous level is put back before the connection
/// returns to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// May see uncommitted writes of other transactions.
    ReadUncommitted,

    /// Sees only committed data. The usual driver default.
    #[default]
    ReadCommitted,

    /// Rows already read do not change for the rest of the transaction.
    RepeatableRead,

    /// Behaves as if transactions ran one after another.
    Serializable,

    /// Reads from a point-in-time view, where the backend supports it.
    Snapshot,
}

impl IsolationLevel {
    /// The level's conventional SQL name, e.g. `READ COMMITTED`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
