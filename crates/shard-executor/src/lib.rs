//! Concurrent execution of rewritten statements.

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod scripted;
pub mod stats;

pub use config::{ExecutorConfig, FailurePolicy};
pub use connection::{ConnectionProvider, PhysicalConnection};
pub use coordinator::{ExecutionCoordinator, ExecutionMode, ExecutionResult, StatementId};
pub use scripted::{ExecutedStatement, ScriptedConnectionProvider, ScriptedResponse};
pub use stats::{ExecutionStats, ExecutionStatsSnapshot};
