//! Sharding values extracted from WHERE predicates.

use indexmap::IndexMap;
use shard_core::{CompareOp, Predicate, Result, ShardError, StatementContext, Value};
use std::cmp::Ordering;
use std::ops::Bound;

/// A range of values with inclusive, exclusive or open ends.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRange {
    pub lower: Bound<Value>,
    pub upper: Bound<Value>,
}

impl ValueRange {
    pub fn new(lower: Bound<Value>, upper: Bound<Value>) -> Self {
        Self { lower, upper }
    }

    pub fn closed(low: Value, high: Value) -> Self {
        Self::new(Bound::Included(low), Bound::Included(high))
    }

    pub fn all() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    pub fn contains(&self, value: &Value) -> bool {
        let above = match &self.lower {
            Bound::Included(l) => value.compare(l) != Ordering::Less,
            Bound::Excluded(l) => value.compare(l) == Ordering::Greater,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(u) => value.compare(u) != Ordering::Greater,
            Bound::Excluded(u) => value.compare(u) == Ordering::Less,
            Bound::Unbounded => true,
        };
        above && below
    }

    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(l), Bound::Included(u)) => l.compare(u) == Ordering::Greater,
            (Bound::Included(l), Bound::Excluded(u))
            | (Bound::Excluded(l), Bound::Included(u))
            | (Bound::Excluded(l), Bound::Excluded(u)) => l.compare(u) != Ordering::Less,
            _ => false,
        }
    }

    /// Intersection of two ranges, `None` when it is empty.
    pub fn intersect(&self, other: &ValueRange) -> Option<ValueRange> {
        let lower = tighter_lower(&self.lower, &other.lower);
        let upper = tighter_upper(&self.upper, &other.upper);
        let range = ValueRange::new(lower, upper);
        (!range.is_empty()).then_some(range)
    }

    /// Inclusive integer bounds, `None` for an open end.
    pub fn int_bounds(&self) -> Result<(Option<i64>, Option<i64>)> {
        let lower = match &self.lower {
            Bound::Included(v) => Some(numeric(v)?.ceil() as i64),
            Bound::Excluded(v) => Some(numeric(v)?.floor() as i64 + 1),
            Bound::Unbounded => None,
        };
        let upper = match &self.upper {
            Bound::Included(v) => Some(numeric(v)?.floor() as i64),
            Bound::Excluded(v) => Some(numeric(v)?.ceil() as i64 - 1),
            Bound::Unbounded => None,
        };
        Ok((lower, upper))
    }
}

fn numeric(value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| ShardError::TypeMismatch {
        expected: "numeric sharding value".to_string(),
        found: value.data_type().to_string(),
    })
}

fn tighter_lower(a: &Bound<Value>, b: &Bound<Value>) -> Bound<Value> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            match x.compare(y) {
                Ordering::Greater => a.clone(),
                Ordering::Less => b.clone(),
                Ordering::Equal if matches!(a, Bound::Excluded(_)) => a.clone(),
                Ordering::Equal => b.clone(),
            }
        }
    }
}

fn tighter_upper(a: &Bound<Value>, b: &Bound<Value>) -> Bound<Value> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x) | Bound::Excluded(x), Bound::Included(y) | Bound::Excluded(y)) => {
            match x.compare(y) {
                Ordering::Less => a.clone(),
                Ordering::Greater => b.clone(),
                Ordering::Equal if matches!(a, Bound::Excluded(_)) => a.clone(),
                Ordering::Equal => b.clone(),
            }
        }
    }
}

/// What one AND-group says about one sharding column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnCondition {
    /// Equality or IN: the column takes one of these values.
    Values(Vec<Value>),
    Range(ValueRange),
}

impl ColumnCondition {
    /// Combine two constraints on the same column; `None` means no value satisfies both.
    pub fn intersect(&self, other: &ColumnCondition) -> Option<ColumnCondition> {
        let condition = match (self, other) {
            (ColumnCondition::Values(a), ColumnCondition::Values(b)) => ColumnCondition::Values(
                a.iter()
                    .filter(|v| b.iter().any(|w| v.compare(w) == Ordering::Equal))
                    .cloned()
                    .collect(),
            ),
            (ColumnCondition::Values(values), ColumnCondition::Range(range))
            | (ColumnCondition::Range(range), ColumnCondition::Values(values)) => {
                ColumnCondition::Values(
                    values.iter().filter(|v| range.contains(v)).cloned().collect(),
                )
            }
            (ColumnCondition::Range(a), ColumnCondition::Range(b)) => {
                ColumnCondition::Range(a.intersect(b)?)
            }
        };
        match &condition {
            ColumnCondition::Values(values) if values.is_empty() => None,
            _ => Some(condition),
        }
    }
}

/// Constraints of one AND-group, keyed by lower-cased column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardingCondition {
    columns: IndexMap<String, ColumnCondition>,
}

impl ShardingCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&ColumnCondition> {
        self.columns.get(&column.to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Add a constraint, intersecting with any existing one. Returns false
    /// when the group became unsatisfiable.
    pub fn add(&mut self, column: &str, condition: ColumnCondition) -> bool {
        let key = column.to_ascii_lowercase();
        let merged = match self.columns.get(&key) {
            Some(existing) => existing.intersect(&condition),
            None => Some(condition),
        };
        match merged {
            Some(merged) => {
                self.columns.insert(key, merged);
                true
            }
            None => false,
        }
    }

    /// Only precise values, so the routing result can be cached.
    pub fn is_precise(&self) -> bool {
        self.columns
            .values()
            .all(|c| matches!(c, ColumnCondition::Values(_)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ColumnCondition)> {
        self.columns.iter()
    }
}

/// Conditions of a whole WHERE clause for one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardingConditions {
    /// One entry per satisfiable AND-group. Empty with `always_false` unset
    /// means the statement has no WHERE clause.
    pub groups: Vec<ShardingCondition>,
    pub always_false: bool,
}

impl ShardingConditions {
    /// Extract the constraints on `columns` that apply to any of `tables`.
    pub fn extract(
        statement: &StatementContext,
        params: &[Value],
        tables: &[String],
        columns: &[String],
    ) -> Result<Self> {
        if statement.predicates.is_empty() {
            return Ok(Self::default());
        }
        let mut groups = Vec::new();
        for and_predicate in &statement.predicates {
            let mut condition = ShardingCondition::new();
            let mut satisfiable = true;
            for predicate in &and_predicate.predicates {
                let column = predicate.column();
                if !columns.iter().any(|c| c.eq_ignore_ascii_case(&column.name)) {
                    continue;
                }
                if let Some(owner) = &column.owner {
                    let applies = statement
                        .resolve_owner(owner)
                        .map(|table| tables.iter().any(|t| t.eq_ignore_ascii_case(table)))
                        .unwrap_or(false);
                    if !applies {
                        continue;
                    }
                }
                let added = match to_column_condition(predicate, params)? {
                    Some(column_condition) => condition.add(&column.name, column_condition),
                    None => false,
                };
                if !added {
                    satisfiable = false;
                    break;
                }
            }
            if satisfiable {
                groups.push(condition);
            }
        }
        let always_false = groups.is_empty();
        Ok(Self {
            groups,
            always_false,
        })
    }
}

/// `None` when the predicate alone matches no value, e.g. `BETWEEN 5 AND 3`.
fn to_column_condition(predicate: &Predicate, params: &[Value]) -> Result<Option<ColumnCondition>> {
    let condition = match predicate {
        Predicate::Compare { op, value, .. } => {
            let value = value.resolve(params)?;
            match op {
                CompareOp::Eq => ColumnCondition::Values(vec![value]),
                CompareOp::Lt => {
                    ColumnCondition::Range(ValueRange::new(Bound::Unbounded, Bound::Excluded(value)))
                }
                CompareOp::LtEq => {
                    ColumnCondition::Range(ValueRange::new(Bound::Unbounded, Bound::Included(value)))
                }
                CompareOp::Gt => {
                    ColumnCondition::Range(ValueRange::new(Bound::Excluded(value), Bound::Unbounded))
                }
                CompareOp::GtEq => {
                    ColumnCondition::Range(ValueRange::new(Bound::Included(value), Bound::Unbounded))
                }
            }
        }
        Predicate::In { values, .. } => ColumnCondition::Values(
            values
                .iter()
                .map(|v| v.resolve(params))
                .collect::<Result<Vec<_>>>()?,
        ),
        Predicate::Between { low, high, .. } => {
            ColumnCondition::Range(ValueRange::closed(low.resolve(params)?, high.resolve(params)?))
        }
    };
    Ok(match &condition {
        ColumnCondition::Values(values) if values.is_empty() => None,
        ColumnCondition::Range(range) if range.is_empty() => None,
        _ => Some(condition),
    })
}
