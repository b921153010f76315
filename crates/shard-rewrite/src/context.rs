use crate::parameter::ParameterMapping;
use shard_core::{
    PaginationValue, Result, SelectContext, ShardError, StatementContext, StatementKind, Value,
};
use shard_route::{RouteContext, RouteUnit};

/// Statement-wide inputs shared by every token generator.
pub struct RewriteContext<'a> {
    pub sql: &'a str,
    pub statement: &'a StatementContext,
    pub params: &'a [Value],
    pub route: &'a RouteContext,
    select: Option<SelectContext>,
    parameter_overrides: Vec<(usize, Value)>,
}

impl<'a> RewriteContext<'a> {
    pub fn new(
        sql: &'a str,
        statement: &'a StatementContext,
        params: &'a [Value],
        route: &'a RouteContext,
    ) -> Result<Self> {
        let select = match statement.kind {
            StatementKind::Select => Some(SelectContext::new(statement, params)?),
            _ => None,
        };
        let derives_columns = select.as_ref().map(|s| !s.derived.is_empty()).unwrap_or(false);
        if derives_columns && route.len() > 1 && statement.projections.is_none() {
            return Err(ShardError::RewriteInvariantViolation(
                "derived merge columns need a projection list to append to".to_string(),
            ));
        }
        let mut context = Self {
            sql,
            statement,
            params,
            route,
            select,
            parameter_overrides: Vec::new(),
        };
        context.parameter_overrides = context.pagination_overrides();
        Ok(context)
    }

    pub fn select(&self) -> Option<&SelectContext> {
        self.select.as_ref()
    }

    pub fn into_select(self) -> Option<SelectContext> {
        self.select
    }

    /// Results of more than one unit will be merged.
    pub fn is_multi_unit(&self) -> bool {
        self.route.len() > 1
    }

    /// Revised LIMIT/OFFSET values, when each shard must over-fetch.
    /// `(offset, row_count)`; `None` means keep the original.
    pub fn revised_pagination(&self) -> Option<(Option<u64>, Option<u64>)> {
        if !self.is_multi_unit() {
            return None;
        }
        let select = self.select.as_ref()?;
        let pagination = select.pagination.as_ref()?;
        let offset = pagination.offset_segment.map(|_| 0);
        let row_count = pagination
            .row_count_segment
            .and_then(|_| pagination.revised_row_count(select.needs_full_fetch()));
        Some((offset, row_count))
    }

    fn pagination_overrides(&self) -> Vec<(usize, Value)> {
        let Some((offset, row_count)) = self.revised_pagination() else {
            return Vec::new();
        };
        let Some(pagination) = self.select.as_ref().and_then(|s| s.pagination.as_ref()) else {
            return Vec::new();
        };
        let mut overrides = Vec::new();
        for (segment, value) in [
            (pagination.offset_segment, offset),
            (pagination.row_count_segment, row_count),
        ] {
            if let (Some(segment), Some(value)) = (segment, value) {
                if let PaginationValue::Parameter(index) = segment.value {
                    overrides.push((index, Value::Int64(value.min(i64::MAX as u64) as i64)));
                }
            }
        }
        overrides
    }

    pub(crate) fn parameter_overrides(&self) -> &[(usize, Value)] {
        &self.parameter_overrides
    }

    pub(crate) fn parameter_count(&self) -> usize {
        self.statement.parameter_count().max(self.params.len())
    }
}

/// What one route unit contributes to its own rewrite.
pub struct UnitScope<'a> {
    pub unit: &'a RouteUnit,
    /// Indexes of the INSERT rows this unit keeps, if it is a routed INSERT.
    pub insert_rows: Option<Vec<usize>>,
    pub parameters: ParameterMapping,
}

impl<'a> UnitScope<'a> {
    pub fn new(context: &RewriteContext<'_>, unit: &'a RouteUnit) -> Self {
        let insert_rows = context.route.insert_rows_for(unit);
        let count = context.parameter_count();
        let parameters = match (&context.statement.insert, &insert_rows) {
            (Some(insert), Some(rows)) if rows.len() < insert.rows.len() => {
                ParameterMapping::for_insert_rows(count, insert, rows)
            }
            _ => ParameterMapping::identity(count),
        };
        Self {
            unit,
            insert_rows,
            parameters,
        }
    }

    /// True when some INSERT rows go elsewhere.
    pub fn drops_insert_rows(&self, context: &RewriteContext<'_>) -> bool {
        match (&context.statement.insert, &self.insert_rows) {
            (Some(insert), Some(rows)) => rows.len() < insert.rows.len(),
            _ => false,
        }
    }
}
