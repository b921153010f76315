//! Shared types for the sharding pipeline: values, errors, the bound
//! statement model and the physical cursor abstraction.

pub mod builder;
pub mod error;
pub mod result;
pub mod select;
pub mod statement;
pub mod value;

pub use builder::StatementBuilder;
pub use error::{ErrorCategory, Result, ShardError, UnitFailure};
pub use result::{MemoryQueryResult, QueryResult};
pub use select::{
    AggregationProjection, ColumnLocator, DerivedProjection, Pagination, SelectContext, SortItem,
};
pub use statement::*;
pub use value::{ColumnMetadata, DataType, Value};
