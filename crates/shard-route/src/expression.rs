//! Inline expressions used in rule configuration.
//!
//! Two flavours share the `${...}` syntax (`$->{...}` is accepted too):
//!
//! * data-node lists, expanded once at load time:
//!   `ds_${0..1}.t_order_${[0, 2]}` yields four names;
//! * algorithm templates evaluated per sharding value:
//!   `t_order_${user_id % 4}`.

use shard_core::{Result, ShardError, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Choices(Vec<String>),
}

/// Expand a comma-separated list of inline expressions into every name it denotes.
pub fn expand(expression: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for part in split_outside_placeholders(expression) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut expanded = vec![String::new()];
        for piece in pieces(part)? {
            expanded = match piece {
                Piece::Text(text) => expanded.into_iter().map(|p| p + &text).collect(),
                Piece::Choices(choices) => expanded
                    .iter()
                    .flat_map(|prefix| choices.iter().map(move |c| format!("{}{}", prefix, c)))
                    .collect(),
            };
        }
        names.extend(expanded);
    }
    Ok(names)
}

fn split_outside_placeholders(expression: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in expression.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&expression[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&expression[start..]);
    parts
}

/// Locate the next placeholder: (start of `$`, start of body, index of `}`).
fn next_placeholder(text: &str, from: usize) -> Option<(usize, usize, usize)> {
    let mut search = from;
    while let Some(found) = text[search..].find('$') {
        let dollar = search + found;
        let rest = &text[dollar..];
        let body = if rest.starts_with("${") {
            dollar + 2
        } else if rest.starts_with("$->{") {
            dollar + 4
        } else {
            search = dollar + 1;
            continue;
        };
        return text[body..].find('}').map(|close| (dollar, body, body + close));
    }
    None
}

fn pieces(part: &str) -> Result<Vec<Piece>> {
    let mut pieces = Vec::new();
    let mut cursor = 0;
    while let Some((dollar, body, close)) = next_placeholder(part, cursor) {
        if dollar > cursor {
            pieces.push(Piece::Text(part[cursor..dollar].to_string()));
        }
        pieces.push(Piece::Choices(choices(part[body..close].trim())?));
        cursor = close + 1;
    }
    if cursor < part.len() {
        pieces.push(Piece::Text(part[cursor..].to_string()));
    }
    Ok(pieces)
}

fn choices(body: &str) -> Result<Vec<String>> {
    if let Some(list) = body.strip_prefix('[').and_then(|b| b.strip_suffix(']')) {
        return Ok(list
            .split(',')
            .map(|item| item.trim().trim_matches(|c: char| c == '\'' || c == '"').to_string())
            .filter(|item| !item.is_empty())
            .collect());
    }
    if let Some((low, high)) = body.split_once("..") {
        let (low, high) = match (low.trim().parse::<i64>(), high.trim().parse::<i64>()) {
            (Ok(low), Ok(high)) => (low, high),
            _ => {
                return Err(ShardError::ConfigurationError(format!(
                    "invalid range `{}` in inline expression",
                    body
                )))
            }
        };
        if low > high {
            return Err(ShardError::ConfigurationError(format!(
                "empty range `{}` in inline expression",
                body
            )));
        }
        return Ok((low..=high).map(|i| i.to_string()).collect());
    }
    Ok(vec![body.to_string()])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Mod,
    Div,
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Column {
        name: String,
        op: Option<(ArithOp, i64)>,
    },
}

/// A compiled algorithm expression such as `t_order_${user_id % 4}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl InlineTemplate {
    pub fn parse(expression: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut cursor = 0;
        while let Some((dollar, body, close)) = next_placeholder(expression, cursor) {
            if dollar > cursor {
                segments.push(Segment::Text(expression[cursor..dollar].to_string()));
            }
            segments.push(parse_placeholder(expression, &expression[body..close])?);
            cursor = close + 1;
        }
        if cursor < expression.len() {
            segments.push(Segment::Text(expression[cursor..].to_string()));
        }
        Ok(Self {
            source: expression.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Column names referenced by placeholders, in order of appearance.
    pub fn columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Column { name, .. } = segment {
                if !columns.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                    columns.push(name);
                }
            }
        }
        columns
    }

    /// Render the template, looking up each placeholder column's value.
    pub fn evaluate<F>(&self, lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Option<Value>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Column { name, op } => {
                    let value = lookup(name).ok_or_else(|| {
                        ShardError::ConfigurationError(format!(
                            "no value for `{}` in inline expression `{}`",
                            name, self.source
                        ))
                    })?;
                    match op {
                        None => out.push_str(&value.to_string()),
                        Some((op, operand)) => {
                            let number = value.as_i64().ok_or_else(|| ShardError::TypeMismatch {
                                expected: "integer sharding value".to_string(),
                                found: value.data_type().to_string(),
                            })?;
                            out.push_str(&self.apply(*op, number, *operand)?.to_string());
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn apply(&self, op: ArithOp, value: i64, operand: i64) -> Result<i64> {
        let result = match op {
            ArithOp::Mod => value.checked_rem_euclid(operand),
            ArithOp::Div => value.checked_div_euclid(operand),
            ArithOp::Add => value.checked_add(operand),
            ArithOp::Sub => value.checked_sub(operand),
            ArithOp::Mul => value.checked_mul(operand),
        };
        result.ok_or_else(|| {
            ShardError::ConfigurationError(format!(
                "arithmetic error evaluating `{}` for {}",
                self.source, value
            ))
        })
    }
}

fn parse_placeholder(expression: &str, body: &str) -> Result<Segment> {
    let body = body.trim();
    let unsupported = || {
        ShardError::ConfigurationError(format!(
            "unsupported placeholder `{}` in `{}`",
            body, expression
        ))
    };
    let name_len = body
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    if name_len == 0 {
        return Err(unsupported());
    }
    let name = body[..name_len].to_string();
    let rest = body[name_len..].trim();
    if rest.is_empty() {
        return Ok(Segment::Column { name, op: None });
    }
    let mut chars = rest.chars();
    let op = match chars.next() {
        Some('%') => ArithOp::Mod,
        Some('/') => ArithOp::Div,
        Some('+') => ArithOp::Add,
        Some('-') => ArithOp::Sub,
        Some('*') => ArithOp::Mul,
        _ => return Err(unsupported()),
    };
    let operand = chars.as_str().trim().parse::<i64>().map_err(|_| unsupported())?;
    Ok(Segment::Column {
        name,
        op: Some((op, operand)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_data_nodes() {
        let nodes = expand("ds_${0..1}.t_order_${0..1}").unwrap();
        assert_eq!(
            nodes,
            vec![
                "ds_0.t_order_0",
                "ds_0.t_order_1",
                "ds_1.t_order_0",
                "ds_1.t_order_1"
            ]
        );
    }

    #[test]
    fn test_expand_lists_and_alternatives() {
        let nodes = expand("ds_0.t_user_${['a', 'b']}, ds_1.t_user_$->{[c]}").unwrap();
        assert_eq!(nodes, vec!["ds_0.t_user_a", "ds_0.t_user_b", "ds_1.t_user_c"]);
        assert_eq!(expand("ds_0.t_plain").unwrap(), vec!["ds_0.t_plain"]);
        assert!(expand("t_${3..1}").is_err());
    }

    #[test]
    fn test_template_evaluation() {
        let template = InlineTemplate::parse("t_order_${user_id % 4}").unwrap();
        assert_eq!(template.columns(), vec!["user_id"]);
        let name = template.evaluate(|_| Some(Value::Int64(9))).unwrap();
        assert_eq!(name, "t_order_1");
        let name = template.evaluate(|_| Some(Value::from("6"))).unwrap();
        assert_eq!(name, "t_order_2");
        assert!(template.evaluate(|_| None).is_err());
    }

    #[test]
    fn test_template_multiple_columns() {
        let template = InlineTemplate::parse("ds_${user_id % 2}_${order_id / 10}").unwrap();
        let name = template
            .evaluate(|column| match column {
                "user_id" => Some(Value::Int64(3)),
                "order_id" => Some(Value::Int64(25)),
                _ => None,
            })
            .unwrap();
        assert_eq!(name, "ds_1_2");
    }

    #[test]
    fn test_rejects_unknown_operator() {
        assert!(InlineTemplate::parse("t_${user_id ^ 2}").is_err());
        assert!(InlineTemplate::parse("t_${user_id % 0}")
            .unwrap()
            .evaluate(|_| Some(Value::Int64(1)))
            .is_err());
    }
}
