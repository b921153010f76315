//! Physical connection abstraction.

use async_trait::async_trait;
use shard_core::{QueryResult, Result, Value};

/// A connection to one physical data source, owned by exactly one unit task.
#[async_trait]
pub trait PhysicalConnection: Send {
    /// Run a row-producing statement.
    ///
    /// The returned cursor must not borrow from the connection: it is read
    /// by the merge stage after `close` has been called.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn QueryResult>>;

    /// Run a DML/DDL statement and return the affected row count.
    async fn update(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Hand the connection back. Called once per unit, after success or failure.
    /// Dropping without closing counts as a reset.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Yields connections by physical data source name.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn acquire(&self, data_source: &str) -> Result<Box<dyn PhysicalConnection>>;
}
