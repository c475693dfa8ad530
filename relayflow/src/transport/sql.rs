//! SQL seam used by the SQL-like destination.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::SqlError;

/// A long-lived connection (or pool) to a SQL database.
#[async_trait]
pub trait SqlConnection: Send + Sync {
    /// Opens a transaction with exclusive use of one connection.
    async fn begin(&self) -> Result<Box<dyn SqlTransaction>, SqlError>;

    /// Executes a statement outside of any explicit transaction.
    async fn execute(&self, query: &str, args: &[Value]) -> Result<u64, SqlError>;

    /// Releases the connection.
    async fn close(&self) {}
}

/// An open transaction. Dropping it without committing rolls it back.
#[async_trait]
pub trait SqlTransaction: Send {
    /// Executes one statement with positional arguments; returns affected
    /// rows.
    async fn execute(&mut self, query: &str, args: &[Value]) -> Result<u64, SqlError>;

    /// Commits every statement executed so far.
    async fn commit(self: Box<Self>) -> Result<(), SqlError>;

    /// Discards every statement executed so far.
    async fn rollback(self: Box<Self>) -> Result<(), SqlError>;
}
