use std::fmt;
use thiserror::Error;

/// One failed route unit, identified by its physical target only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub data_source: String,
    pub actual_tables: Vec<String>,
    pub message: String,
}

impl UnitFailure {
    pub fn new(
        data_source: impl Into<String>,
        actual_tables: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            data_source: data_source.into(),
            actual_tables,
            message: message.into(),
        }
    }
}

impl fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.actual_tables.is_empty() {
            write!(f, "{}: {}", self.data_source, self.message)
        } else {
            write!(
                f,
                "{} ({}): {}",
                self.data_source,
                self.actual_tables.join(", "),
                self.message
            )
        }
    }
}

fn join_failures(failures: &[UnitFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShardError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Sharding configuration error: {0}")]
    ConfigurationError(String),

    #[error("No route targets resolved for {0}")]
    NoTargetsResolved(String),

    #[error("Rewrite invariant violated: {0}")]
    RewriteInvariantViolation(String),

    #[error("Execution failed on {} unit(s): {}", .0.len(), join_failures(.0))]
    ExecutionFailure(Vec<UnitFailure>),

    #[error("Execution on {data_source} timed out after {timeout_ms}ms")]
    ExecutionTimeout { data_source: String, timeout_ms: u64 },

    #[error("Statement cancelled")]
    Cancelled,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Schema mismatch between shards: {0}")]
    SchemaMismatch(String),

    #[error("Unsupported aggregate combination: {0}")]
    UnsupportedAggregateCombination(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Column index {index} out of range ({count} columns)")]
    ColumnIndexOutOfRange { index: usize, count: usize },

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse classification of a [`ShardError`], used for logging and by callers
/// that map errors onto wire-protocol error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Routing,
    Rewrite,
    Execution,
    Merge,
    Config,
}

impl ShardError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ShardError::UnknownTable(_)
            | ShardError::ConfigurationError(_)
            | ShardError::NoTargetsResolved(_) => ErrorCategory::Routing,
            ShardError::RewriteInvariantViolation(_) => ErrorCategory::Rewrite,
            ShardError::ExecutionFailure(_)
            | ShardError::ExecutionTimeout { .. }
            | ShardError::Cancelled
            | ShardError::Connection(_) => ErrorCategory::Execution,
            ShardError::SchemaMismatch(_)
            | ShardError::UnsupportedAggregateCombination(_)
            | ShardError::ColumnNotFound(_)
            | ShardError::ColumnIndexOutOfRange { .. }
            | ShardError::TypeMismatch { .. } => ErrorCategory::Merge,
            ShardError::Io(_) | ShardError::Serialization(_) => ErrorCategory::Config,
        }
    }

    /// Nothing inside the core is retried; retry belongs to the transaction layer.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

impl From<std::io::Error> for ShardError {
    fn from(err: std::io::Error) -> Self {
        ShardError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ShardError>;
