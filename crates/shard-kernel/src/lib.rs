//! Sharding kernel
//!
//! Wires the routing, rewrite, execution and merge stages into one
//! statement pipeline over an atomically swappable rule snapshot.

pub mod config;
pub mod kernel;
pub mod snapshot;
pub mod telemetry;

pub use config::KernelConfig;
pub use kernel::{ExecuteResult, ShardingKernel};
pub use snapshot::RuleSnapshotHolder;
pub use telemetry::init_tracing;

pub use shard_core::{Result, ShardError, StatementBuilder, StatementContext, Value};
pub use shard_executor::{ConnectionProvider, PhysicalConnection, StatementId};
pub use shard_merge::{collect_rows, MergedResult};
pub use shard_route::HintContext;
