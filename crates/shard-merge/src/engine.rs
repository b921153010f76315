use crate::decorator::{DistinctMerge, PaginationMerge, TruncationMerge};
use crate::groupby::{AggregationSlot, GroupByMemoryMerge, GroupByStreamMerge};
use crate::iterator::IteratorMerge;
use crate::orderby::{OrderByStreamMerge, SortKey};
use crate::result::MergedResult;
use shard_core::{
    ColumnMetadata, QueryResult, Result, SelectContext, ShardError, SortItem,
};

/// Picks a merge strategy for a set of unit cursors and stacks the
/// decorators the statement needs on top of it.
#[derive(Debug, Default, Clone, Copy)]
pub struct MergeEngine;

impl MergeEngine {
    pub fn new() -> Self {
        Self
    }

    /// Merge unit cursors into one logical cursor.
    ///
    /// `select` is `None` for statements without SELECT semantics (DAL),
    /// which are always concatenated.
    pub fn merge(
        &self,
        results: Vec<Box<dyn QueryResult>>,
        select: Option<&SelectContext>,
    ) -> Result<Box<dyn MergedResult>> {
        let Some(first) = results.first() else {
            return Ok(Box::new(IteratorMerge::new(Vec::new(), Vec::new())));
        };
        let metadata = first.metadata().to_vec();
        check_schema(&metadata, &results)?;

        let select = match select {
            Some(select) if results.len() > 1 => select,
            _ => return Ok(Box::new(IteratorMerge::new(results, metadata))),
        };
        if select.has_distinct_aggregation() {
            return Err(ShardError::UnsupportedAggregateCombination(
                "DISTINCT aggregation over more than one unit".to_string(),
            ));
        }

        let derived = select.derived.len();
        let order_keys = sort_keys(&select.order_by, &metadata, derived)?;
        let units = results.len();
        let mut merged: Box<dyn MergedResult> = if select.is_grouped() {
            let group_keys = sort_keys(&select.group_by, &metadata, derived)?;
            let slots = aggregation_slots(select, &metadata)?;
            if select.is_same_group_and_order() {
                tracing::debug!(units, "Using group-by stream merge");
                Box::new(GroupByStreamMerge::new(results, metadata, group_keys, slots))
            } else {
                tracing::debug!(units, "Using group-by memory merge");
                Box::new(GroupByMemoryMerge::new(
                    results,
                    metadata,
                    &group_keys,
                    &order_keys,
                    &slots,
                )?)
            }
        } else if !order_keys.is_empty() {
            tracing::debug!(units, "Using order-by stream merge");
            Box::new(OrderByStreamMerge::new(results, metadata, order_keys))
        } else {
            tracing::debug!(units, "Using iterator merge");
            Box::new(IteratorMerge::new(results, metadata))
        };

        if select.distinct_row {
            let visible = merged.column_count().saturating_sub(derived);
            merged = Box::new(DistinctMerge::new(merged, visible));
        }
        if let Some(pagination) = &select.pagination {
            merged = Box::new(PaginationMerge::new(
                merged,
                pagination.offset,
                pagination.row_count,
            ));
        }
        if derived > 0 {
            merged = Box::new(TruncationMerge::new(merged, derived));
        }
        Ok(merged)
    }
}

fn check_schema(expected: &[ColumnMetadata], results: &[Box<dyn QueryResult>]) -> Result<()> {
    for (unit, result) in results.iter().enumerate().skip(1) {
        let actual = result.metadata();
        if actual.len() != expected.len() {
            return Err(ShardError::SchemaMismatch(format!(
                "unit {} returned {} columns, expected {}",
                unit,
                actual.len(),
                expected.len()
            )));
        }
        for (a, e) in actual.iter().zip(expected) {
            if !a.data_type.is_compatible_with(&e.data_type) {
                return Err(ShardError::SchemaMismatch(format!(
                    "unit {} column '{}' is {}, expected {}",
                    unit, a.label, a.data_type, e.data_type
                )));
            }
        }
    }
    Ok(())
}

fn sort_keys(
    items: &[SortItem],
    metadata: &[ColumnMetadata],
    derived: usize,
) -> Result<Vec<SortKey>> {
    items
        .iter()
        .map(|item| {
            Ok(SortKey {
                item: item.clone(),
                index: item.locator.resolve(metadata, derived)?,
            })
        })
        .collect()
}

fn aggregation_slots(
    select: &SelectContext,
    metadata: &[ColumnMetadata],
) -> Result<Vec<AggregationSlot>> {
    let derived = select.derived.len();
    select
        .aggregations
        .iter()
        .map(|aggregation| {
            let output = aggregation.locator.resolve(metadata, derived)?;
            let inputs = match &aggregation.avg_derived {
                Some((count, sum)) => vec![
                    count.resolve(metadata, derived)?,
                    sum.resolve(metadata, derived)?,
                ],
                None => vec![output],
            };
            Ok(AggregationSlot {
                kind: aggregation.kind,
                output,
                inputs,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::collect_rows;
    use shard_core::{
        AggregationType, ColumnRef, DataType, MemoryQueryResult, OrderByItem, Projection,
        StatementBuilder, Value,
    };

    fn unit(metadata: &[ColumnMetadata], rows: Vec<Vec<Value>>) -> Box<dyn QueryResult> {
        Box::new(MemoryQueryResult::new(metadata.to_vec(), rows))
    }

    fn int_rows(values: &[i64]) -> Vec<Vec<Value>> {
        values.iter().map(|&v| vec![Value::Int64(v)]).collect()
    }

    fn column(name: &str) -> Projection {
        Projection::Column {
            column: ColumnRef::new(name),
            alias: None,
        }
    }

    fn aggregate(kind: AggregationType, argument: &str, distinct: bool) -> Projection {
        Projection::Aggregation {
            kind,
            argument: argument.to_string(),
            distinct,
            alias: None,
        }
    }

    fn id_meta() -> Vec<ColumnMetadata> {
        vec![ColumnMetadata::new("id", DataType::Int64, false)]
    }

    fn ids(rows: Vec<Vec<Value>>) -> Vec<i64> {
        rows.iter().filter_map(|r| r[0].as_i64()).collect()
    }

    #[test]
    fn test_order_by_merge_is_globally_sorted() {
        let stmt = StatementBuilder::select("SELECT * FROM orders ORDER BY id")
            .table("orders")
            .projections(vec![Projection::Shorthand { owner: None }])
            .order_by(OrderByItem::asc(ColumnRef::new("id")))
            .build()
            .unwrap();
        let select = SelectContext::new(&stmt, &[]).unwrap();
        let meta = id_meta();
        let results = vec![
            unit(&meta, int_rows(&[1, 4, 7, 10])),
            unit(&meta, int_rows(&[2, 3, 8])),
            unit(&meta, int_rows(&[])),
            unit(&meta, int_rows(&[5, 6, 9])),
        ];
        let mut merged = MergeEngine::new().merge(results, Some(&select)).unwrap();
        let out = ids(collect_rows(merged.as_mut()).unwrap());
        assert_eq!(out, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_descending_merge_with_nulls_last() {
        let stmt = StatementBuilder::select("SELECT * FROM orders ORDER BY id DESC")
            .table("orders")
            .projections(vec![Projection::Shorthand { owner: None }])
            .order_by(OrderByItem::desc(ColumnRef::new("id")))
            .build()
            .unwrap();
        let select = SelectContext::new(&stmt, &[]).unwrap();
        let meta = vec![ColumnMetadata::new("id", DataType::Int64, true)];
        let results = vec![
            unit(&meta, vec![vec![Value::Int64(9)], vec![Value::Int64(2)], vec![Value::Null]]),
            unit(&meta, vec![vec![Value::Int64(5)], vec![Value::Int64(1)]]),
        ];
        let mut merged = MergeEngine::new().merge(results, Some(&select)).unwrap();
        let rows = collect_rows(merged.as_mut()).unwrap();
        let out: Vec<Value> = rows.into_iter().map(|r| r[0].clone()).collect();
        assert_eq!(
            out,
            vec![
                Value::Int64(9),
                Value::Int64(5),
                Value::Int64(2),
                Value::Int64(1),
                Value::Null
            ]
        );
    }

    #[test]
    fn test_pagination_over_sorted_shards() {
        let sql = "SELECT * FROM orders ORDER BY id LIMIT 5 OFFSET 3";
        let stmt = StatementBuilder::select(sql)
            .table("orders")
            .projections(vec![Projection::Shorthand { owner: None }])
            .order_by(OrderByItem::asc(ColumnRef::new("id")))
            .limit()
            .build()
            .unwrap();
        let select = SelectContext::new(&stmt, &[]).unwrap();
        let meta = id_meta();
        // Each shard already honoured LIMIT 8 OFFSET 0.
        let results = vec![
            unit(&meta, int_rows(&[1, 3, 5, 7, 9, 11, 13, 15])),
            unit(&meta, int_rows(&[2, 4, 6, 8, 10, 12, 14, 16])),
        ];
        let mut merged = MergeEngine::new().merge(results, Some(&select)).unwrap();
        assert_eq!(ids(collect_rows(merged.as_mut()).unwrap()), vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_single_unit_is_passed_through() {
        let sql = "SELECT * FROM orders ORDER BY id LIMIT 1 OFFSET 1";
        let stmt = StatementBuilder::select(sql)
            .table("orders")
            .projections(vec![Projection::Shorthand { owner: None }])
            .order_by(OrderByItem::asc(ColumnRef::new("id")))
            .limit()
            .build()
            .unwrap();
        let select = SelectContext::new(&stmt, &[]).unwrap();
        let meta = id_meta();
        // The database already applied the pagination.
        let results = vec![unit(&meta, int_rows(&[2]))];
        let mut merged = MergeEngine::new().merge(results, Some(&select)).unwrap();
        assert_eq!(ids(collect_rows(merged.as_mut()).unwrap()), vec![2]);
    }

    #[test]
    fn test_ungrouped_aggregates() {
        let sql = "SELECT COUNT(*), MAX(price), AVG(price) FROM orders";
        let stmt = StatementBuilder::select(sql)
            .table("orders")
            .projections(vec![
                aggregate(AggregationType::Count, "*", false),
                aggregate(AggregationType::Max, "price", false),
                aggregate(AggregationType::Avg, "price", false),
            ])
            .build()
            .unwrap();
        let select = SelectContext::new(&stmt, &[]).unwrap();
        let meta = vec![
            ColumnMetadata::new("COUNT(*)", DataType::Int64, false),
            ColumnMetadata::new("MAX(price)", DataType::Int64, true),
            ColumnMetadata::new("AVG(price)", DataType::Float64, true),
            ColumnMetadata::new("AVG_DERIVED_COUNT_0", DataType::Int64, false),
            ColumnMetadata::new("AVG_DERIVED_SUM_0", DataType::Int64, true),
        ];
        let results = vec![
            unit(
                &meta,
                vec![vec![
                    Value::Int64(1),
                    Value::Int64(10),
                    Value::Float64(10.0),
                    Value::Int64(1),
                    Value::Int64(10),
                ]],
            ),
            unit(
                &meta,
                vec![vec![
                    Value::Int64(2),
                    Value::Int64(50),
                    Value::Float64(40.0),
                    Value::Int64(2),
                    Value::Int64(80),
                ]],
            ),
        ];
        let mut merged = MergeEngine::new().merge(results, Some(&select)).unwrap();
        assert_eq!(merged.column_count(), 3);
        let rows = collect_rows(merged.as_mut()).unwrap();
        assert_eq!(
            rows,
            vec![vec![Value::Int64(3), Value::Int64(50), Value::Float64(30.0)]]
        );
    }

    fn grouped_select(sql: &str, ordered: bool) -> SelectContext {
        let mut builder = StatementBuilder::select(sql)
            .table("orders")
            .projections(vec![
                column("user_id"),
                aggregate(AggregationType::Sum, "price", false),
            ])
            .group_by(OrderByItem::asc(ColumnRef::new("user_id")));
        if ordered {
            builder = builder.order_by(OrderByItem::asc(ColumnRef::new("user_id")));
        }
        SelectContext::new(&builder.build().unwrap(), &[]).unwrap()
    }

    fn grouped_meta() -> Vec<ColumnMetadata> {
        vec![
            ColumnMetadata::new("user_id", DataType::Int64, false),
            ColumnMetadata::new("SUM(price)", DataType::Int64, true),
        ]
    }

    fn pairs(values: &[(i64, i64)]) -> Vec<Vec<Value>> {
        values
            .iter()
            .map(|&(k, v)| vec![Value::Int64(k), Value::Int64(v)])
            .collect()
    }

    #[test]
    fn test_group_by_stream_merge() {
        let select = grouped_select(
            "SELECT user_id, SUM(price) FROM orders GROUP BY user_id ORDER BY user_id",
            true,
        );
        assert!(select.is_same_group_and_order());
        let meta = grouped_meta();
        let results = vec![
            unit(&meta, pairs(&[(1, 10), (2, 5), (4, 1)])),
            unit(&meta, pairs(&[(2, 7), (3, 3), (4, 9)])),
        ];
        let mut merged = MergeEngine::new().merge(results, Some(&select)).unwrap();
        let rows = collect_rows(merged.as_mut()).unwrap();
        assert_eq!(rows, pairs(&[(1, 10), (2, 12), (3, 3), (4, 10)]));
    }

    #[test]
    fn test_group_by_memory_merge_keeps_first_seen_order() {
        let select = grouped_select(
            "SELECT user_id, SUM(price) FROM orders GROUP BY user_id",
            false,
        );
        assert!(select.needs_memory_grouping());
        let meta = grouped_meta();
        let results = vec![
            unit(&meta, pairs(&[(3, 1), (1, 2)])),
            unit(&meta, pairs(&[(1, 4), (2, 8), (3, 5)])),
        ];
        let mut merged = MergeEngine::new().merge(results, Some(&select)).unwrap();
        let rows = collect_rows(merged.as_mut()).unwrap();
        assert_eq!(rows, pairs(&[(3, 6), (1, 6), (2, 8)]));
    }

    #[test]
    fn test_group_by_memory_merge_sorted_by_aggregate() {
        let sql = "SELECT user_id, SUM(price) AS total FROM orders GROUP BY user_id ORDER BY total DESC";
        let stmt = StatementBuilder::select(sql)
            .table("orders")
            .projections(vec![
                column("user_id"),
                Projection::Aggregation {
                    kind: AggregationType::Sum,
                    argument: "price".to_string(),
                    distinct: false,
                    alias: Some("total".to_string()),
                },
            ])
            .group_by(OrderByItem::asc(ColumnRef::new("user_id")))
            .order_by(OrderByItem::desc(ColumnRef::new("total")))
            .build()
            .unwrap();
        let select = SelectContext::new(&stmt, &[]).unwrap();
        let meta = vec![
            ColumnMetadata::new("user_id", DataType::Int64, false),
            ColumnMetadata::new("total", DataType::Int64, true),
        ];
        let results = vec![
            unit(&meta, pairs(&[(1, 5), (2, 1)])),
            unit(&meta, pairs(&[(2, 20), (3, 7)])),
        ];
        let mut merged = MergeEngine::new().merge(results, Some(&select)).unwrap();
        let rows = collect_rows(merged.as_mut()).unwrap();
        assert_eq!(rows, pairs(&[(2, 21), (3, 7), (1, 5)]));
    }

    #[test]
    fn test_distinct_rows_across_units() {
        let stmt = StatementBuilder::select("SELECT DISTINCT id FROM orders")
            .table("orders")
            .projections(vec![column("id")])
            .build()
            .unwrap();
        let select = SelectContext::new(&stmt, &[]).unwrap();
        let meta = id_meta();
        let results = vec![unit(&meta, int_rows(&[1, 2])), unit(&meta, int_rows(&[2, 3]))];
        let mut merged = MergeEngine::new().merge(results, Some(&select)).unwrap();
        assert_eq!(ids(collect_rows(merged.as_mut()).unwrap()), vec![1, 2, 3]);
    }

    #[test]
    fn test_schema_mismatch() {
        let meta = id_meta();
        let other = vec![
            ColumnMetadata::new("id", DataType::Int64, false),
            ColumnMetadata::new("name", DataType::Utf8, true),
        ];
        let results = vec![unit(&meta, int_rows(&[1])), unit(&other, Vec::new())];
        assert!(matches!(
            MergeEngine::new().merge(results, None),
            Err(ShardError::SchemaMismatch(_))
        ));

        let text = vec![ColumnMetadata::new("id", DataType::Utf8, false)];
        let results = vec![unit(&meta, int_rows(&[1])), unit(&text, Vec::new())];
        assert!(matches!(
            MergeEngine::new().merge(results, None),
            Err(ShardError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_distinct_aggregate_over_units_is_rejected() {
        let stmt = StatementBuilder::select("SELECT COUNT(DISTINCT user_id) FROM orders")
            .table("orders")
            .projections(vec![aggregate(AggregationType::Count, "user_id", true)])
            .build()
            .unwrap();
        let select = SelectContext::new(&stmt, &[]).unwrap();
        let meta = vec![ColumnMetadata::new("COUNT(DISTINCT user_id)", DataType::Int64, false)];
        let results = vec![unit(&meta, int_rows(&[1])), unit(&meta, int_rows(&[2]))];
        assert!(matches!(
            MergeEngine::new().merge(results, Some(&select)),
            Err(ShardError::UnsupportedAggregateCombination(_))
        ));
    }

    #[test]
    fn test_no_results_is_empty() {
        let mut merged = MergeEngine::new().merge(Vec::new(), None).unwrap();
        assert!(!merged.next().unwrap());
        assert_eq!(merged.column_count(), 0);
    }

    #[test]
    fn test_unordered_results_are_concatenated() {
        let meta = id_meta();
        let results = vec![unit(&meta, int_rows(&[5, 1])), unit(&meta, int_rows(&[3]))];
        let mut merged = MergeEngine::new().merge(results, None).unwrap();
        assert_eq!(ids(collect_rows(merged.as_mut()).unwrap()), vec![5, 1, 3]);
    }
}
