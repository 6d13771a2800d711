use std::future::Future;

use crate::contracts::error::BoxError;
use crate::contracts::statement::Statement;

/// Supplies short-lived connections to the durable store.
///
/// The provider owns pooling and network concerns. A connection is released
/// when it is dropped, so every path out of a keychain call releases it.
pub trait ConnectionProvider: Send + Sync {
    type Connection: Connection;

    /// Acquires a connection, waiting for one if the pool is exhausted.
    fn acquire(&self) -> impl Future<Output = Result<Self::Connection, BoxError>> + Send;

    /// Closes the underlying pool.
    fn close(&self) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// A connection able to run compiled keychain statements.
///
/// Each statement is a single atomic operation on the remote side.
pub trait Connection: Send {
    /// Runs a statement bound to `key` followed by `args` and returns the
    /// single BIGINT column of its row, or `None` when no row matched.
    fn fetch_value(
        &mut self,
        statement: &Statement,
        key: &str,
        args: &[i64],
    ) -> impl Future<Output = Result<Option<i64>, BoxError>> + Send;

    /// Runs a statement that returns no rows.
    fn execute(&mut self, statement: &Statement) -> impl Future<Output = Result<(), BoxError>> + Send;
}
