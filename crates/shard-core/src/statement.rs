//! Bound statement model handed over by the parser/binder.
//!
//! The sharding core never parses SQL text. It receives a [`StatementContext`]
//! that names the statement kind, every table reference with its position in
//! the original SQL, the WHERE clause in disjunctive normal form, and the
//! projection / ORDER BY / GROUP BY / LIMIT / VALUES segments the rewrite and
//! merge stages need. All positions are inclusive byte offsets into the
//! original SQL text.

use crate::error::{Result, ShardError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    /// Schema changes (CREATE/ALTER/DROP TABLE, CREATE INDEX, ...)
    Ddl,
    /// Administrative statements (SHOW, SET, USE, ...)
    Dal,
}

impl StatementKind {
    /// Row-producing statements; everything else yields an update count.
    pub fn is_query(&self) -> bool {
        matches!(self, StatementKind::Select | StatementKind::Dal)
    }

    pub fn is_dml_write(&self) -> bool {
        matches!(
            self,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete
        )
    }
}

/// A table reference and the span of its name in the SQL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSegment {
    pub name: String,
    pub alias: Option<String>,
    pub start: usize,
    pub stop: usize,
}

/// An index name reference (DDL, index hints).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSegment {
    pub name: String,
    pub table: String,
    pub start: usize,
    pub stop: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Table name or alias qualifying the column, if any.
    pub owner: Option<String>,
    pub name: String,
}

impl ColumnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            owner: None,
            name: name.into(),
        }
    }

    pub fn qualified(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            name: name.into(),
        }
    }

    /// SQL text of the reference, e.g. `o.user_id`.
    pub fn expression(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}.{}", owner, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression())
    }
}

/// A literal value or a positional parameter marker (zero-based index).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueExpr {
    Literal(Value),
    Parameter(usize),
}

impl ValueExpr {
    pub fn resolve(&self, params: &[Value]) -> Result<Value> {
        match self {
            ValueExpr::Literal(v) => Ok(v.clone()),
            ValueExpr::Parameter(index) => params.get(*index).cloned().ok_or_else(|| {
                ShardError::ConfigurationError(format!(
                    "parameter {} not bound ({} parameters supplied)",
                    index,
                    params.len()
                ))
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

/// One comparison against a column, as found in the WHERE clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Compare {
        column: ColumnRef,
        op: CompareOp,
        value: ValueExpr,
    },
    In {
        column: ColumnRef,
        values: Vec<ValueExpr>,
    },
    Between {
        column: ColumnRef,
        low: ValueExpr,
        high: ValueExpr,
    },
}

impl Predicate {
    pub fn column(&self) -> &ColumnRef {
        match self {
            Predicate::Compare { column, .. }
            | Predicate::In { column, .. }
            | Predicate::Between { column, .. } => column,
        }
    }
}

/// Conjunction of predicates. A WHERE clause is a disjunction of these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AndPredicate {
    pub predicates: Vec<Predicate>,
}

impl AndPredicate {
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Self { predicates }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationType {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregationType::Count => "COUNT",
            AggregationType::Sum => "SUM",
            AggregationType::Avg => "AVG",
            AggregationType::Max => "MAX",
            AggregationType::Min => "MIN",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    /// `*` or `owner.*`
    Shorthand { owner: Option<String> },
    Column {
        column: ColumnRef,
        alias: Option<String>,
    },
    Aggregation {
        kind: AggregationType,
        /// Argument text inside the parentheses, e.g. `*` or `price`.
        argument: String,
        distinct: bool,
        alias: Option<String>,
    },
    Expression {
        text: String,
        alias: Option<String>,
    },
}

impl Projection {
    /// Column label a physical database reports for this projection.
    pub fn label(&self) -> Option<String> {
        match self {
            Projection::Shorthand { .. } => None,
            Projection::Column { column, alias } => {
                Some(alias.clone().unwrap_or_else(|| column.name.clone()))
            }
            Projection::Aggregation {
                kind,
                argument,
                distinct,
                alias,
            } => Some(alias.clone().unwrap_or_else(|| {
                if *distinct {
                    format!("{}(DISTINCT {})", kind, argument)
                } else {
                    format!("{}({})", kind, argument)
                }
            })),
            Projection::Expression { text, alias } => {
                Some(alias.clone().unwrap_or_else(|| text.clone()))
            }
        }
    }
}

/// The select list. `stop` is the last byte of the last projection, which is
/// where derived projections get appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionsSegment {
    pub start: usize,
    pub stop: usize,
    pub distinct_row: bool,
    pub items: Vec<Projection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderByItem {
    pub column: ColumnRef,
    pub direction: OrderDirection,
    pub nulls: Option<NullsOrder>,
}

impl OrderByItem {
    pub fn asc(column: ColumnRef) -> Self {
        Self {
            column,
            direction: OrderDirection::Asc,
            nulls: None,
        }
    }

    pub fn desc(column: ColumnRef) -> Self {
        Self {
            column,
            direction: OrderDirection::Desc,
            nulls: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaginationValue {
    Literal(u64),
    Parameter(usize),
}

impl PaginationValue {
    pub fn resolve(&self, params: &[Value]) -> Result<u64> {
        match self {
            PaginationValue::Literal(v) => Ok(*v),
            PaginationValue::Parameter(index) => {
                let value = params.get(*index).ok_or_else(|| {
                    ShardError::ConfigurationError(format!(
                        "pagination parameter {} not bound",
                        index
                    ))
                })?;
                value
                    .as_i64()
                    .and_then(|v| u64::try_from(v).ok())
                    .ok_or_else(|| ShardError::TypeMismatch {
                        expected: "non-negative integer".to_string(),
                        found: value.data_type().to_string(),
                    })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationSegment {
    pub value: PaginationValue,
    pub start: usize,
    pub stop: usize,
}

/// LIMIT/OFFSET in either `LIMIT n OFFSET m` or `LIMIT m, n` form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSegment {
    pub offset: Option<PaginationSegment>,
    pub row_count: Option<PaginationSegment>,
}

/// One parenthesised row of an INSERT ... VALUES list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertRow {
    pub start: usize,
    pub stop: usize,
    pub values: Vec<ValueExpr>,
}

impl InsertRow {
    pub fn parameter_indices(&self) -> Vec<usize> {
        self.values
            .iter()
            .filter_map(|v| match v {
                ValueExpr::Parameter(index) => Some(*index),
                ValueExpr::Literal(_) => None,
            })
            .collect()
    }
}

/// The VALUES list. `start`..=`stop` spans from the first row's `(` to the
/// last row's `)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertValuesSegment {
    pub columns: Vec<String>,
    pub start: usize,
    pub stop: usize,
    pub rows: Vec<InsertRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterStyle {
    /// `?` markers, numbered implicitly by position.
    Question,
    /// `$1`-style markers, numbered explicitly.
    Dollar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMarker {
    pub index: usize,
    pub start: usize,
    pub stop: usize,
    pub style: ParameterStyle,
}

/// Everything the routing, rewrite and merge stages need to know about one
/// bound statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementContext {
    pub kind: StatementKind,
    pub tables: Vec<TableSegment>,
    pub indexes: Vec<IndexSegment>,
    /// WHERE clause in disjunctive normal form; empty means no WHERE.
    pub predicates: Vec<AndPredicate>,
    pub projections: Option<ProjectionsSegment>,
    pub group_by: Vec<OrderByItem>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<LimitSegment>,
    pub insert: Option<InsertValuesSegment>,
    pub parameter_markers: Vec<ParameterMarker>,
}

impl StatementContext {
    pub fn new(kind: StatementKind) -> Self {
        Self {
            kind,
            tables: Vec::new(),
            indexes: Vec::new(),
            predicates: Vec::new(),
            projections: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            insert: None,
            parameter_markers: Vec::new(),
        }
    }

    /// Distinct logical table names in order of first reference.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for table in &self.tables {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&table.name)) {
                names.push(table.name.clone());
            }
        }
        names
    }

    /// Resolve a column owner (table name or alias) to the table it names.
    pub fn resolve_owner(&self, owner: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|t| {
                t.alias
                    .as_deref()
                    .map(|a| a.eq_ignore_ascii_case(owner))
                    .unwrap_or(false)
                    || t.name.eq_ignore_ascii_case(owner)
            })
            .map(|t| t.name.as_str())
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_markers
            .iter()
            .map(|m| m.index + 1)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(name: &str, alias: Option<&str>, start: usize) -> TableSegment {
        TableSegment {
            name: name.to_string(),
            alias: alias.map(str::to_string),
            start,
            stop: start + name.len() - 1,
        }
    }

    #[test]
    fn test_table_names_deduplicated() {
        let mut stmt = StatementContext::new(StatementKind::Select);
        stmt.tables.push(segment("t_order", Some("o"), 14));
        stmt.tables.push(segment("T_ORDER", None, 40));
        stmt.tables.push(segment("t_order_item", Some("i"), 60));
        assert_eq!(stmt.table_names(), vec!["t_order", "t_order_item"]);
    }

    #[test]
    fn test_resolve_owner() {
        let mut stmt = StatementContext::new(StatementKind::Select);
        stmt.tables.push(segment("t_order", Some("o"), 14));
        assert_eq!(stmt.resolve_owner("O"), Some("t_order"));
        assert_eq!(stmt.resolve_owner("t_order"), Some("t_order"));
        assert_eq!(stmt.resolve_owner("x"), None);
    }

    #[test]
    fn test_pagination_parameter() {
        let params = vec![Value::Int64(10), Value::Int64(-1)];
        assert_eq!(PaginationValue::Parameter(0).resolve(&params).unwrap(), 10);
        assert!(PaginationValue::Parameter(1).resolve(&params).is_err());
        assert!(PaginationValue::Parameter(2).resolve(&params).is_err());
    }

    #[test]
    fn test_aggregation_label() {
        let projection = Projection::Aggregation {
            kind: AggregationType::Count,
            argument: "*".to_string(),
            distinct: false,
            alias: None,
        };
        assert_eq!(projection.label().unwrap(), "COUNT(*)");
    }
}
