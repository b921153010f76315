//! Merge-relevant semantics of a SELECT: sort keys, groups, aggregations,
//! pagination and the derived columns that must be fetched for them.

use crate::error::{Result, ShardError};
use crate::statement::{
    AggregationType, ColumnRef, LimitSegment, NullsOrder, OrderByItem, OrderDirection,
    PaginationSegment, Projection, StatementContext,
};
use crate::value::{ColumnMetadata, Value};
use std::cmp::Ordering;

pub const ORDER_BY_DERIVED_PREFIX: &str = "ORDER_BY_DERIVED_";
pub const GROUP_BY_DERIVED_PREFIX: &str = "GROUP_BY_DERIVED_";
pub const AVG_DERIVED_COUNT_PREFIX: &str = "AVG_DERIVED_COUNT_";
pub const AVG_DERIVED_SUM_PREFIX: &str = "AVG_DERIVED_SUM_";

/// How to find one logical column in a physical cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLocator {
    pub label: String,
    fallback: Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback {
    None,
    /// Position in the select list, known when no `*` precedes it.
    Position(usize),
    /// Position among the appended derived columns.
    Derived(usize),
}

impl ColumnLocator {
    fn label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            fallback: Fallback::None,
        }
    }

    /// Resolve against cursor metadata: label first, then position.
    pub fn resolve(&self, metadata: &[ColumnMetadata], derived_count: usize) -> Result<usize> {
        if let Some(index) = metadata
            .iter()
            .position(|m| m.label.eq_ignore_ascii_case(&self.label))
        {
            return Ok(index);
        }
        if let Some(index) = metadata
            .iter()
            .position(|m| m.name.eq_ignore_ascii_case(&self.label))
        {
            return Ok(index);
        }
        let fallback = match self.fallback {
            Fallback::None => None,
            Fallback::Position(p) => Some(p),
            Fallback::Derived(d) => metadata
                .len()
                .checked_sub(derived_count)
                .map(|base| base + d),
        };
        match fallback {
            Some(index) if index < metadata.len() => Ok(index),
            _ => Err(ShardError::ColumnNotFound(self.label.clone())),
        }
    }
}

/// One ORDER BY or GROUP BY key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortItem {
    pub column: ColumnRef,
    pub locator: ColumnLocator,
    pub direction: OrderDirection,
    pub nulls: Option<NullsOrder>,
}

impl SortItem {
    /// Compare two key values. NULL sorts lowest unless NULLS FIRST/LAST says otherwise.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let nulls_first = match self.nulls {
            Some(NullsOrder::First) => true,
            Some(NullsOrder::Last) => false,
            None => self.direction == OrderDirection::Asc,
        };
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if nulls_first => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if nulls_first => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => match self.direction {
                OrderDirection::Asc => a.compare(b),
                OrderDirection::Desc => a.compare(b).reverse(),
            },
        }
    }

    fn same_key(&self, other: &SortItem) -> bool {
        self.locator.label.eq_ignore_ascii_case(&other.locator.label)
            && self.direction == other.direction
            && self.nulls == other.nulls
    }
}

/// An aggregate projection and, for AVG, its derived COUNT/SUM columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationProjection {
    pub kind: AggregationType,
    pub distinct: bool,
    pub locator: ColumnLocator,
    pub avg_derived: Option<(ColumnLocator, ColumnLocator)>,
}

/// A column appended to the select list for merge bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedProjection {
    pub expression: String,
    pub alias: String,
}

impl DerivedProjection {
    pub fn to_sql(&self) -> String {
        format!("{} AS {}", self.expression, self.alias)
    }
}

/// LIMIT/OFFSET with parameters already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub offset_segment: Option<PaginationSegment>,
    pub row_count_segment: Option<PaginationSegment>,
    pub offset: u64,
    pub row_count: Option<u64>,
}

impl Pagination {
    fn new(segment: &LimitSegment, params: &[Value]) -> Result<Self> {
        let offset = match &segment.offset {
            Some(s) => s.value.resolve(params)?,
            None => 0,
        };
        let row_count = match &segment.row_count {
            Some(s) => Some(s.value.resolve(params)?),
            None => None,
        };
        Ok(Self {
            offset_segment: segment.offset,
            row_count_segment: segment.row_count,
            offset,
            row_count,
        })
    }

    /// Row count each shard must return so the merged stream can still be
    /// paginated correctly.
    pub fn revised_row_count(&self, fetch_all: bool) -> Option<u64> {
        if fetch_all {
            return Some(i64::MAX as u64);
        }
        self.row_count
            .map(|count| count.saturating_add(self.offset).min(i64::MAX as u64))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectContext {
    pub order_by: Vec<SortItem>,
    pub group_by: Vec<SortItem>,
    pub aggregations: Vec<AggregationProjection>,
    pub derived: Vec<DerivedProjection>,
    pub distinct_row: bool,
    pub pagination: Option<Pagination>,
}

impl SelectContext {
    pub fn new(statement: &StatementContext, params: &[Value]) -> Result<Self> {
        let items: &[Projection] = statement
            .projections
            .as_ref()
            .map(|p| p.items.as_slice())
            .unwrap_or(&[]);
        let mut derived = Vec::new();

        let mut order_by = Vec::with_capacity(statement.order_by.len());
        for item in &statement.order_by {
            order_by.push(sort_item(
                statement,
                items,
                item,
                &mut derived,
                ORDER_BY_DERIVED_PREFIX,
            ));
        }
        let mut group_by = Vec::with_capacity(statement.group_by.len());
        for item in &statement.group_by {
            group_by.push(sort_item(
                statement,
                items,
                item,
                &mut derived,
                GROUP_BY_DERIVED_PREFIX,
            ));
        }

        let mut aggregations = Vec::new();
        let mut avg_count = 0;
        for (index, projection) in items.iter().enumerate() {
            if let Projection::Aggregation {
                kind,
                argument,
                distinct,
                ..
            } = projection
            {
                let label = projection.label().unwrap_or_default();
                let locator = ColumnLocator {
                    label,
                    fallback: position_fallback(items, index),
                };
                let avg_derived = if *kind == AggregationType::Avg {
                    let argument = if *distinct {
                        format!("DISTINCT {}", argument)
                    } else {
                        argument.clone()
                    };
                    let count = push_derived(
                        &mut derived,
                        format!("COUNT({})", argument),
                        format!("{}{}", AVG_DERIVED_COUNT_PREFIX, avg_count),
                    );
                    let sum = push_derived(
                        &mut derived,
                        format!("SUM({})", argument),
                        format!("{}{}", AVG_DERIVED_SUM_PREFIX, avg_count),
                    );
                    avg_count += 1;
                    Some((count, sum))
                } else {
                    None
                };
                aggregations.push(AggregationProjection {
                    kind: *kind,
                    distinct: *distinct,
                    locator,
                    avg_derived,
                });
            }
        }

        let pagination = match &statement.limit {
            Some(segment) => Some(Pagination::new(segment, params)?),
            None => None,
        };

        Ok(Self {
            order_by,
            group_by,
            aggregations,
            derived,
            distinct_row: statement
                .projections
                .as_ref()
                .map(|p| p.distinct_row)
                .unwrap_or(false),
            pagination,
        })
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty() || !self.aggregations.is_empty()
    }

    /// ORDER BY lists exactly the GROUP BY keys, so groups arrive contiguously.
    pub fn is_same_group_and_order(&self) -> bool {
        !self.group_by.is_empty()
            && self.group_by.len() == self.order_by.len()
            && self
                .group_by
                .iter()
                .zip(&self.order_by)
                .all(|(g, o)| g.same_key(o))
    }

    /// Grouping that can only finish after every shard is drained.
    pub fn needs_memory_grouping(&self) -> bool {
        self.is_grouped() && !self.is_same_group_and_order()
    }

    /// Groups, or duplicate rows, may span shards, so a shard-level LIMIT
    /// cannot bound them.
    pub fn needs_full_fetch(&self) -> bool {
        (!self.group_by.is_empty() && !self.is_same_group_and_order()) || self.distinct_row
    }

    pub fn has_distinct_aggregation(&self) -> bool {
        self.aggregations.iter().any(|a| a.distinct)
    }
}

fn push_derived(
    derived: &mut Vec<DerivedProjection>,
    expression: String,
    alias: String,
) -> ColumnLocator {
    let index = derived.len();
    derived.push(DerivedProjection {
        expression,
        alias: alias.clone(),
    });
    ColumnLocator {
        label: alias,
        fallback: Fallback::Derived(index),
    }
}

fn position_fallback(items: &[Projection], index: usize) -> Fallback {
    if items[..index]
        .iter()
        .any(|p| matches!(p, Projection::Shorthand { .. }))
    {
        Fallback::None
    } else {
        Fallback::Position(index)
    }
}

fn owners_match(statement: &StatementContext, a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            let a = statement.resolve_owner(a).unwrap_or(a);
            let b = statement.resolve_owner(b).unwrap_or(b);
            a.eq_ignore_ascii_case(b)
        }
        _ => true,
    }
}

fn sort_item(
    statement: &StatementContext,
    items: &[Projection],
    item: &OrderByItem,
    derived: &mut Vec<DerivedProjection>,
    prefix: &str,
) -> SortItem {
    let column = &item.column;
    let locator = find_projection(statement, items, column)
        .or_else(|| {
            derived
                .iter()
                .position(|d| d.expression.eq_ignore_ascii_case(&column.expression()))
                .map(|index| ColumnLocator {
                    label: derived[index].alias.clone(),
                    fallback: Fallback::Derived(index),
                })
        })
        .unwrap_or_else(|| {
            let ordinal = derived
                .iter()
                .filter(|d| d.alias.starts_with(prefix))
                .count();
            push_derived(
                derived,
                column.expression(),
                format!("{}{}", prefix, ordinal),
            )
        });
    SortItem {
        column: column.clone(),
        locator,
        direction: item.direction,
        nulls: item.nulls,
    }
}

fn find_projection(
    statement: &StatementContext,
    items: &[Projection],
    column: &ColumnRef,
) -> Option<ColumnLocator> {
    for (index, projection) in items.iter().enumerate() {
        let found = match projection {
            Projection::Column {
                column: projected,
                alias,
            } => {
                (projected.name.eq_ignore_ascii_case(&column.name)
                    && owners_match(statement, &projected.owner, &column.owner))
                    || (column.owner.is_none()
                        && alias
                            .as_deref()
                            .map(|a| a.eq_ignore_ascii_case(&column.name))
                            .unwrap_or(false))
            }
            Projection::Aggregation { alias, .. } | Projection::Expression { alias, .. } => {
                column.owner.is_none()
                    && alias
                        .as_deref()
                        .map(|a| a.eq_ignore_ascii_case(&column.name))
                        .unwrap_or(false)
            }
            Projection::Shorthand { .. } => false,
        };
        if found {
            return Some(ColumnLocator {
                label: projection.label().unwrap_or_else(|| column.name.clone()),
                fallback: position_fallback(items, index),
            });
        }
    }
    let covered_by_shorthand = items.iter().any(|p| match p {
        Projection::Shorthand { owner: None } => true,
        Projection::Shorthand { owner: Some(owner) } => {
            owners_match(statement, &Some(owner.clone()), &column.owner)
        }
        _ => false,
    });
    covered_by_shorthand.then(|| ColumnLocator::label(column.name.clone()))
}
