//! Builder that assembles a [`StatementContext`] by locating segments in SQL text.
//!
//! Binders normally compute positions while parsing. Tools and tests that
//! construct statements by hand use this builder instead: every method finds
//! its segment in the SQL (case-insensitively, outside string literals) and
//! records the inclusive span, so nobody has to count bytes.

use crate::error::{Result, ShardError};
use crate::statement::*;
use crate::value::Value;

pub struct StatementBuilder {
    sql: String,
    context: StatementContext,
    table_cursor: usize,
    error: Option<ShardError>,
}

impl StatementBuilder {
    pub fn new(sql: impl Into<String>, kind: StatementKind) -> Self {
        let sql = sql.into();
        let mut context = StatementContext::new(kind);
        context.parameter_markers = scan_parameter_markers(&sql);
        Self {
            sql,
            context,
            table_cursor: 0,
            error: None,
        }
    }

    pub fn select(sql: impl Into<String>) -> Self {
        Self::new(sql, StatementKind::Select)
    }

    pub fn insert(sql: impl Into<String>) -> Self {
        Self::new(sql, StatementKind::Insert)
    }

    pub fn update(sql: impl Into<String>) -> Self {
        Self::new(sql, StatementKind::Update)
    }

    pub fn delete(sql: impl Into<String>) -> Self {
        Self::new(sql, StatementKind::Delete)
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(ShardError::ConfigurationError(message));
        }
    }

    /// Record the next occurrence of `name` as a table reference.
    pub fn table(self, name: &str) -> Self {
        self.table_with_alias(name, None)
    }

    pub fn table_as(self, name: &str, alias: &str) -> Self {
        self.table_with_alias(name, Some(alias))
    }

    fn table_with_alias(mut self, name: &str, alias: Option<&str>) -> Self {
        match find_word(&self.sql, name, self.table_cursor) {
            Some(start) => {
                let stop = start + name.len() - 1;
                self.context.tables.push(TableSegment {
                    name: name.to_string(),
                    alias: alias.map(str::to_string),
                    start,
                    stop,
                });
                self.table_cursor = stop + 1;
            }
            None => self.fail(format!("cannot locate table `{}` in SQL", name)),
        }
        self
    }

    pub fn index(mut self, name: &str, table: &str) -> Self {
        match find_word(&self.sql, name, 0) {
            Some(start) => self.context.indexes.push(IndexSegment {
                name: name.to_string(),
                table: table.to_string(),
                start,
                stop: start + name.len() - 1,
            }),
            None => self.fail(format!("cannot locate index `{}` in SQL", name)),
        }
        self
    }

    /// Locate the select list between SELECT [DISTINCT] and FROM.
    pub fn projections(mut self, items: Vec<Projection>) -> Self {
        let Some(select_at) = find_word(&self.sql, "SELECT", 0) else {
            self.fail("cannot locate SELECT in SQL".to_string());
            return self;
        };
        let mut start = skip_whitespace(&self.sql, select_at + "SELECT".len());
        let distinct_row = starts_with_word(&self.sql, start, "DISTINCT");
        if distinct_row {
            start = skip_whitespace(&self.sql, start + "DISTINCT".len());
        }
        let end = find_word(&self.sql, "FROM", start).unwrap_or(self.sql.len());
        let stop = match last_non_whitespace(&self.sql, start, end) {
            Some(stop) => stop,
            None => {
                self.fail("empty select list".to_string());
                return self;
            }
        };
        self.context.projections = Some(ProjectionsSegment {
            start,
            stop,
            distinct_row,
            items,
        });
        self
    }

    /// Add one disjunct (an AND-group) of the WHERE clause.
    pub fn where_and(mut self, predicates: Vec<Predicate>) -> Self {
        self.context.predicates.push(AndPredicate::new(predicates));
        self
    }

    pub fn order_by(mut self, item: OrderByItem) -> Self {
        self.context.order_by.push(item);
        self
    }

    pub fn group_by(mut self, item: OrderByItem) -> Self {
        self.context.group_by.push(item);
        self
    }

    /// Locate LIMIT / OFFSET and parse their literal or parameter operands.
    pub fn limit(mut self) -> Self {
        let mut segment = LimitSegment::default();
        if let Some(limit_at) = find_word(&self.sql, "LIMIT", 0) {
            let first_at = skip_whitespace(&self.sql, limit_at + "LIMIT".len());
            let Some(first) = self.pagination_operand(first_at) else {
                self.fail("cannot read LIMIT operand".to_string());
                return self;
            };
            let after = skip_whitespace(&self.sql, first.stop + 1);
            if self.sql[after..].starts_with(',') {
                let second_at = skip_whitespace(&self.sql, after + 1);
                match self.pagination_operand(second_at) {
                    Some(second) => {
                        segment.offset = Some(first);
                        segment.row_count = Some(second);
                    }
                    None => {
                        self.fail("cannot read LIMIT row count".to_string());
                        return self;
                    }
                }
            } else {
                segment.row_count = Some(first);
            }
        }
        if segment.offset.is_none() {
            if let Some(offset_at) = find_word(&self.sql, "OFFSET", 0) {
                let operand_at = skip_whitespace(&self.sql, offset_at + "OFFSET".len());
                match self.pagination_operand(operand_at) {
                    Some(offset) => segment.offset = Some(offset),
                    None => {
                        self.fail("cannot read OFFSET operand".to_string());
                        return self;
                    }
                }
            }
        }
        if segment.offset.is_none() && segment.row_count.is_none() {
            self.fail("cannot locate LIMIT or OFFSET in SQL".to_string());
        } else {
            self.context.limit = Some(segment);
        }
        self
    }

    fn pagination_operand(&self, at: usize) -> Option<PaginationSegment> {
        if let Some(marker) = self.context.parameter_markers.iter().find(|m| m.start == at) {
            return Some(PaginationSegment {
                value: PaginationValue::Parameter(marker.index),
                start: marker.start,
                stop: marker.stop,
            });
        }
        let digits = self.sql[at..]
            .bytes()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            return None;
        }
        let value = self.sql[at..at + digits].parse().ok()?;
        Some(PaginationSegment {
            value: PaginationValue::Literal(value),
            start: at,
            stop: at + digits - 1,
        })
    }

    /// Locate the VALUES list and parse each row's literals and markers.
    pub fn insert_values(mut self, columns: &[&str]) -> Self {
        let Some(values_at) = find_word(&self.sql, "VALUES", 0) else {
            self.fail("cannot locate VALUES in SQL".to_string());
            return self;
        };
        let bytes = self.sql.as_bytes();
        let mut at = skip_whitespace(&self.sql, values_at + "VALUES".len());
        let mut rows = Vec::new();
        while at < bytes.len() && bytes[at] == b'(' {
            let Some(close) = matching_paren(&self.sql, at) else {
                self.fail("unbalanced parentheses in VALUES".to_string());
                return self;
            };
            let values = split_top_level(&self.sql, at + 1, close)
                .into_iter()
                .map(|(s, e)| self.value_expr(s, e))
                .collect();
            rows.push(InsertRow {
                start: at,
                stop: close,
                values,
            });
            let next = skip_whitespace(&self.sql, close + 1);
            if next < bytes.len() && bytes[next] == b',' {
                at = skip_whitespace(&self.sql, next + 1);
            } else {
                break;
            }
        }
        match (rows.first(), rows.last()) {
            (Some(first), Some(last)) => {
                self.context.insert = Some(InsertValuesSegment {
                    columns: columns.iter().map(|c| c.to_string()).collect(),
                    start: first.start,
                    stop: last.stop,
                    rows,
                });
            }
            _ => self.fail("VALUES list has no rows".to_string()),
        }
        self
    }

    fn value_expr(&self, start: usize, end: usize) -> ValueExpr {
        if let Some(marker) = self
            .context
            .parameter_markers
            .iter()
            .find(|m| m.start >= start && m.stop < end)
        {
            return ValueExpr::Parameter(marker.index);
        }
        let text = self.sql[start..end].trim();
        ValueExpr::Literal(parse_literal(text))
    }

    pub fn build(self) -> Result<StatementContext> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.context),
        }
    }
}

fn parse_literal(text: &str) -> Value {
    if text.eq_ignore_ascii_case("NULL") {
        return Value::Null;
    }
    if text.eq_ignore_ascii_case("TRUE") {
        return Value::Boolean(true);
    }
    if text.eq_ignore_ascii_case("FALSE") {
        return Value::Boolean(false);
    }
    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        return Value::Utf8(text[1..text.len() - 1].replace("''", "'"));
    }
    if let Ok(v) = text.parse::<i64>() {
        return Value::Int64(v);
    }
    if let Ok(v) = text.parse::<f64>() {
        return Value::Float64(v);
    }
    Value::Utf8(text.to_string())
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Byte ranges of single-quoted string literals.
fn quoted_ranges(sql: &str) -> Vec<(usize, usize)> {
    let bytes = sql.as_bytes();
    let mut ranges = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            let start = i;
            i += 1;
            while i < bytes.len() {
                if bytes[i] == b'\'' {
                    if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                        i += 2;
                        continue;
                    }
                    break;
                }
                i += 1;
            }
            ranges.push((start, i.min(bytes.len().saturating_sub(1))));
        }
        i += 1;
    }
    ranges
}

fn in_ranges(ranges: &[(usize, usize)], at: usize) -> bool {
    ranges.iter().any(|(s, e)| at >= *s && at <= *e)
}

/// Case-insensitive whole-word search outside string literals.
pub fn find_word(sql: &str, word: &str, from: usize) -> Option<usize> {
    if word.is_empty() || from >= sql.len() {
        return None;
    }
    let quoted = quoted_ranges(sql);
    let haystack = sql.to_ascii_lowercase();
    let needle = word.to_ascii_lowercase();
    let bytes = sql.as_bytes();
    let mut search_from = from;
    while let Some(found) = haystack[search_from..].find(&needle) {
        let start = search_from + found;
        let end = start + needle.len();
        let boundary_before = start == 0 || !is_ident_byte(bytes[start - 1]);
        let boundary_after = end >= bytes.len() || !is_ident_byte(bytes[end]);
        if boundary_before && boundary_after && !in_ranges(&quoted, start) {
            return Some(start);
        }
        search_from = start + 1;
        if search_from >= sql.len() {
            break;
        }
    }
    None
}

fn starts_with_word(sql: &str, at: usize, word: &str) -> bool {
    let end = at + word.len();
    end <= sql.len()
        && sql[at..end].eq_ignore_ascii_case(word)
        && (end == sql.len() || !is_ident_byte(sql.as_bytes()[end]))
}

fn skip_whitespace(sql: &str, mut at: usize) -> usize {
    let bytes = sql.as_bytes();
    while at < bytes.len() && bytes[at].is_ascii_whitespace() {
        at += 1;
    }
    at
}

fn last_non_whitespace(sql: &str, start: usize, end: usize) -> Option<usize> {
    let bytes = sql.as_bytes();
    (start..end).rev().find(|&i| !bytes[i].is_ascii_whitespace())
}

fn matching_paren(sql: &str, open: usize) -> Option<usize> {
    let quoted = quoted_ranges(sql);
    let bytes = sql.as_bytes();
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_ranges(&quoted, i) {
            continue;
        }
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split `sql[start..end]` on commas that are not nested or quoted.
fn split_top_level(sql: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let quoted = quoted_ranges(sql);
    let bytes = sql.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut part_start = start;
    for i in start..end {
        if in_ranges(&quoted, i) {
            continue;
        }
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push((part_start, i));
                part_start = i + 1;
            }
            _ => {}
        }
    }
    parts.push((part_start, end));
    parts
}

/// Find `?` and `$n` markers outside string literals.
pub fn scan_parameter_markers(sql: &str) -> Vec<ParameterMarker> {
    let quoted = quoted_ranges(sql);
    let bytes = sql.as_bytes();
    let mut markers = Vec::new();
    let mut next_question = 0;
    let mut i = 0;
    while i < bytes.len() {
        if in_ranges(&quoted, i) {
            i += 1;
            continue;
        }
        match bytes[i] {
            b'?' => {
                markers.push(ParameterMarker {
                    index: next_question,
                    start: i,
                    stop: i,
                    style: ParameterStyle::Question,
                });
                next_question += 1;
            }
            b'$' => {
                let digits = bytes[i + 1..]
                    .iter()
                    .take_while(|b| b.is_ascii_digit())
                    .count();
                if digits > 0 {
                    if let Ok(n) = sql[i + 1..i + 1 + digits].parse::<usize>() {
                        if n > 0 {
                            markers.push(ParameterMarker {
                                index: n - 1,
                                start: i,
                                stop: i + digits,
                                style: ParameterStyle::Dollar,
                            });
                        }
                    }
                    i += digits;
                }
            }
            _ => {}
        }
        i += 1;
    }
    markers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_tables_in_order() {
        let sql = "SELECT * FROM t_order o JOIN t_order_item i ON o.order_id = i.order_id";
        let stmt = StatementBuilder::select(sql)
            .table_as("t_order", "o")
            .table_as("t_order_item", "i")
            .build()
            .unwrap();
        assert_eq!(stmt.tables[0].start, 14);
        assert_eq!(&sql[stmt.tables[0].start..=stmt.tables[0].stop], "t_order");
        assert_eq!(
            &sql[stmt.tables[1].start..=stmt.tables[1].stop],
            "t_order_item"
        );
    }

    #[test]
    fn test_missing_table_is_an_error() {
        let result = StatementBuilder::select("SELECT 1").table("t_user").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_projection_span() {
        let sql = "SELECT DISTINCT user_id, status FROM t_order";
        let stmt = StatementBuilder::select(sql)
            .projections(vec![])
            .build()
            .unwrap();
        let projections = stmt.projections.unwrap();
        assert!(projections.distinct_row);
        assert_eq!(
            &sql[projections.start..=projections.stop],
            "user_id, status"
        );
    }

    #[test]
    fn test_limit_offset_forms() {
        let sql = "SELECT * FROM t_order ORDER BY id LIMIT 5 OFFSET 3";
        let limit = StatementBuilder::select(sql).limit().build().unwrap().limit.unwrap();
        assert_eq!(limit.row_count.unwrap().value, PaginationValue::Literal(5));
        assert_eq!(limit.offset.unwrap().value, PaginationValue::Literal(3));

        let sql = "SELECT * FROM t_order LIMIT ?, ?";
        let limit = StatementBuilder::select(sql).limit().build().unwrap().limit.unwrap();
        assert_eq!(limit.offset.unwrap().value, PaginationValue::Parameter(0));
        assert_eq!(limit.row_count.unwrap().value, PaginationValue::Parameter(1));
    }

    #[test]
    fn test_insert_rows() {
        let sql = "INSERT INTO t_order (user_id, note) VALUES (1, 'a,b'), (?, NULL)";
        let stmt = StatementBuilder::insert(sql)
            .table("t_order")
            .insert_values(&["user_id", "note"])
            .build()
            .unwrap();
        let insert = stmt.insert.unwrap();
        assert_eq!(insert.rows.len(), 2);
        assert_eq!(
            insert.rows[0].values,
            vec![
                ValueExpr::Literal(Value::Int64(1)),
                ValueExpr::Literal(Value::from("a,b"))
            ]
        );
        assert_eq!(insert.rows[1].values[0], ValueExpr::Parameter(0));
        assert_eq!(&sql[insert.start..=insert.stop], "(1, 'a,b'), (?, NULL)");
    }

    #[test]
    fn test_markers_skip_literals() {
        let markers = scan_parameter_markers("SELECT '?' , ? FROM t WHERE a = $2");
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].style, ParameterStyle::Question);
        assert_eq!(markers[0].index, 0);
        assert_eq!(markers[1].style, ParameterStyle::Dollar);
        assert_eq!(markers[1].index, 1);
    }
}
