//! Token generators. Each one looks at the statement independently and
//! emits the tokens for its own concern.

use crate::context::{RewriteContext, UnitScope};
use crate::token::SqlToken;
use shard_core::{ParameterStyle, PaginationValue, Result, ShardError};

pub trait TokenGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap statement-level check run before any unit is visited.
    fn is_applicable(&self, context: &RewriteContext<'_>) -> bool;

    fn generate(&self, context: &RewriteContext<'_>, scope: &UnitScope<'_>) -> Result<Vec<SqlToken>>;
}

/// Logical table names -> the unit's actual tables.
pub struct TableTokenGenerator;

impl TokenGenerator for TableTokenGenerator {
    fn name(&self) -> &'static str {
        "table"
    }

    fn is_applicable(&self, context: &RewriteContext<'_>) -> bool {
        !context.statement.tables.is_empty()
    }

    fn generate(&self, context: &RewriteContext<'_>, scope: &UnitScope<'_>) -> Result<Vec<SqlToken>> {
        let mut tokens = Vec::new();
        for table in &context.statement.tables {
            let actual = scope.unit.actual_table(&table.name).ok_or_else(|| {
                ShardError::RewriteInvariantViolation(format!(
                    "unit {} has no actual table for `{}`",
                    scope.unit, table.name
                ))
            })?;
            if !actual.eq_ignore_ascii_case(&table.name) {
                tokens.push(SqlToken::replace(table.start, table.stop, actual));
            }
        }
        Ok(tokens)
    }
}

/// Index names become `<index>_<actual table>` so they stay unique per shard.
pub struct IndexTokenGenerator;

impl TokenGenerator for IndexTokenGenerator {
    fn name(&self) -> &'static str {
        "index"
    }

    fn is_applicable(&self, context: &RewriteContext<'_>) -> bool {
        !context.statement.indexes.is_empty()
    }

    fn generate(&self, context: &RewriteContext<'_>, scope: &UnitScope<'_>) -> Result<Vec<SqlToken>> {
        let mut tokens = Vec::new();
        for index in &context.statement.indexes {
            let actual = scope.unit.actual_table(&index.table).ok_or_else(|| {
                ShardError::RewriteInvariantViolation(format!(
                    "unit {} has no actual table for index `{}` on `{}`",
                    scope.unit, index.name, index.table
                ))
            })?;
            if !actual.eq_ignore_ascii_case(&index.table) {
                tokens.push(SqlToken::replace(
                    index.start,
                    index.stop,
                    format!("{}_{}", index.name, actual),
                ));
            }
        }
        Ok(tokens)
    }
}

/// Appends ORDER BY / GROUP BY / AVG bookkeeping columns after the select list.
pub struct ProjectionTokenGenerator;

impl TokenGenerator for ProjectionTokenGenerator {
    fn name(&self) -> &'static str {
        "projection"
    }

    fn is_applicable(&self, context: &RewriteContext<'_>) -> bool {
        context.is_multi_unit()
            && context.statement.projections.is_some()
            && context.select().map(|s| !s.derived.is_empty()).unwrap_or(false)
    }

    fn generate(&self, context: &RewriteContext<'_>, _scope: &UnitScope<'_>) -> Result<Vec<SqlToken>> {
        let (Some(segment), Some(select)) = (&context.statement.projections, context.select()) else {
            return Ok(Vec::new());
        };
        let text: String = select
            .derived
            .iter()
            .map(|d| format!(", {}", d.to_sql()))
            .collect();
        Ok(vec![SqlToken::insert(segment.stop + 1, text)])
    }
}

/// Literal LIMIT/OFFSET -> `offset + limit` and 0. Parameter operands are
/// handled by overriding the parameter value instead.
pub struct PaginationTokenGenerator;

impl TokenGenerator for PaginationTokenGenerator {
    fn name(&self) -> &'static str {
        "pagination"
    }

    fn is_applicable(&self, context: &RewriteContext<'_>) -> bool {
        context.revised_pagination().is_some()
    }

    fn generate(&self, context: &RewriteContext<'_>, _scope: &UnitScope<'_>) -> Result<Vec<SqlToken>> {
        let (Some((offset, row_count)), Some(pagination)) = (
            context.revised_pagination(),
            context.select().and_then(|s| s.pagination.as_ref()),
        ) else {
            return Ok(Vec::new());
        };
        let mut tokens = Vec::new();
        for (segment, value) in [
            (pagination.offset_segment, offset),
            (pagination.row_count_segment, row_count),
        ] {
            if let (Some(segment), Some(value)) = (segment, value) {
                if let PaginationValue::Literal(_) = segment.value {
                    tokens.push(SqlToken::replace(segment.start, segment.stop, value.to_string()));
                }
            }
        }
        Ok(tokens)
    }
}

/// Rewrites the VALUES list to the rows routed to this unit.
pub struct InsertValuesTokenGenerator;

impl TokenGenerator for InsertValuesTokenGenerator {
    fn name(&self) -> &'static str {
        "insert_values"
    }

    fn is_applicable(&self, context: &RewriteContext<'_>) -> bool {
        context.statement.insert.is_some() && context.route.insert_row_nodes().is_some()
    }

    fn generate(&self, context: &RewriteContext<'_>, scope: &UnitScope<'_>) -> Result<Vec<SqlToken>> {
        let (Some(insert), Some(rows)) = (&context.statement.insert, &scope.insert_rows) else {
            return Ok(Vec::new());
        };
        if !scope.drops_insert_rows(context) {
            return Ok(Vec::new());
        }
        if rows.is_empty() {
            return Err(ShardError::RewriteInvariantViolation(format!(
                "unit {} was routed no insert rows",
                scope.unit
            )));
        }
        let mut parts = Vec::with_capacity(rows.len());
        for &row_index in rows {
            let row = insert.rows.get(row_index).ok_or_else(|| {
                ShardError::RewriteInvariantViolation(format!(
                    "insert row {} does not exist (statement has {})",
                    row_index,
                    insert.rows.len()
                ))
            })?;
            parts.push(renumbered_text(context, scope, row.start, row.stop)?);
        }
        Ok(vec![SqlToken::replace(insert.start, insert.stop, parts.join(", "))])
    }
}

/// Renumbers `$n` markers outside the VALUES list once rows are dropped.
pub struct ParameterMarkerTokenGenerator;

impl TokenGenerator for ParameterMarkerTokenGenerator {
    fn name(&self) -> &'static str {
        "parameter_marker"
    }

    fn is_applicable(&self, context: &RewriteContext<'_>) -> bool {
        context
            .statement
            .parameter_markers
            .iter()
            .any(|m| m.style == ParameterStyle::Dollar)
    }

    fn generate(&self, context: &RewriteContext<'_>, scope: &UnitScope<'_>) -> Result<Vec<SqlToken>> {
        if scope.parameters.is_identity() {
            return Ok(Vec::new());
        }
        let values_span = context
            .statement
            .insert
            .as_ref()
            .filter(|_| scope.drops_insert_rows(context))
            .map(|insert| insert.start..=insert.stop);
        let mut tokens = Vec::new();
        for marker in &context.statement.parameter_markers {
            if marker.style != ParameterStyle::Dollar {
                continue;
            }
            if values_span.as_ref().map(|s| s.contains(&marker.start)).unwrap_or(false) {
                continue;
            }
            let target = scope.parameters.map(marker.index).ok_or_else(|| {
                ShardError::RewriteInvariantViolation(format!(
                    "parameter ${} is used outside the dropped insert rows",
                    marker.index + 1
                ))
            })?;
            if target != marker.index {
                tokens.push(SqlToken::replace(marker.start, marker.stop, format!("${}", target + 1)));
            }
        }
        Ok(tokens)
    }
}

/// Text of `sql[start..=stop]` with its `$n` markers renumbered for the unit.
fn renumbered_text(
    context: &RewriteContext<'_>,
    scope: &UnitScope<'_>,
    start: usize,
    stop: usize,
) -> Result<String> {
    if stop >= context.sql.len() || start > stop {
        return Err(ShardError::RewriteInvariantViolation(format!(
            "span {}..={} outside SQL of length {}",
            start,
            stop,
            context.sql.len()
        )));
    }
    let mut text = String::new();
    let mut cursor = start;
    for marker in &context.statement.parameter_markers {
        if marker.style != ParameterStyle::Dollar || marker.start < start || marker.stop > stop {
            continue;
        }
        let target = scope.parameters.map(marker.index).ok_or_else(|| {
            ShardError::RewriteInvariantViolation(format!(
                "kept insert row references dropped parameter ${}",
                marker.index + 1
            ))
        })?;
        text.push_str(&context.sql[cursor..marker.start]);
        text.push_str(&format!("${}", target + 1));
        cursor = marker.stop + 1;
    }
    text.push_str(&context.sql[cursor..=stop]);
    Ok(text)
}

/// The built-in generators in application order.
pub fn default_generators() -> Vec<Box<dyn TokenGenerator>> {
    vec![
        Box::new(TableTokenGenerator),
        Box::new(IndexTokenGenerator),
        Box::new(ProjectionTokenGenerator),
        Box::new(PaginationTokenGenerator),
        Box::new(InsertValuesTokenGenerator),
        Box::new(ParameterMarkerTokenGenerator),
    ]
}
