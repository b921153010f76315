use shard_core::{Result, ShardError};
use std::fmt;

/// A replacement for `sql[start..end]`. `start == end` inserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlToken {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl SqlToken {
    /// Replace the inclusive span `start..=stop` as recorded by the binder.
    pub fn replace(start: usize, stop: usize, text: impl Into<String>) -> Self {
        Self {
            start,
            end: stop + 1,
            text: text.into(),
        }
    }

    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self {
            start: at,
            end: at,
            text: text.into(),
        }
    }

    pub fn is_insertion(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for SqlToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}) -> {:?}", self.start, self.end, self.text)
    }
}

/// Apply tokens to `sql`, last position first, leaving all other text intact.
pub fn splice(sql: &str, mut tokens: Vec<SqlToken>) -> Result<String> {
    tokens.sort_by_key(|t| (t.start, t.end));
    for pair in tokens.windows(2) {
        if pair[1].start < pair[0].end {
            return Err(ShardError::RewriteInvariantViolation(format!(
                "overlapping tokens {} and {}",
                pair[0], pair[1]
            )));
        }
    }
    for token in &tokens {
        if token.end > sql.len()
            || token.start > token.end
            || !sql.is_char_boundary(token.start)
            || !sql.is_char_boundary(token.end)
        {
            return Err(ShardError::RewriteInvariantViolation(format!(
                "token {} outside SQL of length {}",
                token,
                sql.len()
            )));
        }
    }

    let mut out = sql.to_string();
    for token in tokens.iter().rev() {
        out.replace_range(token.start..token.end, &token.text);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splice_replaces_and_inserts() {
        let sql = "SELECT a FROM t_order WHERE id = 1";
        let tokens = vec![
            SqlToken::replace(14, 20, "t_order_1"),
            SqlToken::insert(8, ", b AS ORDER_BY_DERIVED_0"),
        ];
        assert_eq!(
            splice(sql, tokens).unwrap(),
            "SELECT a, b AS ORDER_BY_DERIVED_0 FROM t_order_1 WHERE id = 1"
        );
    }

    #[test]
    fn test_splice_without_tokens_is_identity() {
        assert_eq!(splice("SELECT 1", Vec::new()).unwrap(), "SELECT 1");
    }

    #[test]
    fn test_overlap_is_rejected() {
        let err = splice(
            "SELECT * FROM t_order",
            vec![SqlToken::replace(14, 20, "x"), SqlToken::replace(18, 19, "y")],
        )
        .unwrap_err();
        assert!(matches!(err, ShardError::RewriteInvariantViolation(_)));
    }

    #[test]
    fn test_out_of_bounds_is_rejected() {
        assert!(splice("SELECT 1", vec![SqlToken::replace(7, 12, "2")]).is_err());
    }
}
