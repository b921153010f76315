//! Reassembles per-unit result cursors into one logical result.

pub mod aggregation;
pub mod decorator;
pub mod engine;
pub mod groupby;
pub mod iterator;
pub mod orderby;
pub mod result;

pub use aggregation::{create_unit, AggregationUnit};
pub use decorator::{DistinctMerge, PaginationMerge, TruncationMerge};
pub use engine::MergeEngine;
pub use groupby::{AggregationSlot, GroupByMemoryMerge, GroupByStreamMerge};
pub use iterator::IteratorMerge;
pub use orderby::{OrderByStreamMerge, SortKey};
pub use result::{collect_rows, MergedResult};
