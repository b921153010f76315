use crate::error::{Result, ShardError};
use crate::value::{ColumnMetadata, Value};

/// Cursor over one physical result set.
///
/// Cursors start before the first row; `next` moves to the following row and
/// reports whether one exists. Column indexes are zero-based.
pub trait QueryResult: Send {
    fn next(&mut self) -> Result<bool>;

    fn value(&self, index: usize) -> Result<Value>;

    fn metadata(&self) -> &[ColumnMetadata];

    fn column_count(&self) -> usize {
        self.metadata().len()
    }
}

/// A fully materialized result set, as returned by drivers that buffer rows.
#[derive(Debug, Clone)]
pub struct MemoryQueryResult {
    metadata: Vec<ColumnMetadata>,
    rows: Vec<Vec<Value>>,
    position: Option<usize>,
}

impl MemoryQueryResult {
    pub fn new(metadata: Vec<ColumnMetadata>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            metadata,
            rows,
            position: None,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows not yet returned by `next`.
    pub fn remaining(&self) -> usize {
        match self.position {
            None => self.rows.len(),
            Some(p) => self.rows.len().saturating_sub(p + 1),
        }
    }
}

impl QueryResult for MemoryQueryResult {
    fn next(&mut self) -> Result<bool> {
        let next = self.position.map(|p| p + 1).unwrap_or(0);
        if next < self.rows.len() {
            self.position = Some(next);
            Ok(true)
        } else {
            self.position = Some(self.rows.len());
            Ok(false)
        }
    }

    fn value(&self, index: usize) -> Result<Value> {
        let row = self
            .position
            .and_then(|p| self.rows.get(p))
            .ok_or_else(|| ShardError::ColumnNotFound("cursor is not on a row".to_string()))?;
        row.get(index)
            .cloned()
            .ok_or(ShardError::ColumnIndexOutOfRange {
                index,
                count: self.metadata.len(),
            })
    }

    fn metadata(&self) -> &[ColumnMetadata] {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DataType;

    #[test]
    fn test_memory_cursor() {
        let mut result = MemoryQueryResult::new(
            vec![ColumnMetadata::new("id", DataType::Int64, false)],
            vec![vec![Value::Int64(1)], vec![Value::Int64(2)]],
        );
        assert!(result.value(0).is_err());
        assert!(result.next().unwrap());
        assert_eq!(result.value(0).unwrap(), Value::Int64(1));
        assert_eq!(result.remaining(), 1);
        assert!(result.next().unwrap());
        assert_eq!(result.value(0).unwrap(), Value::Int64(2));
        assert!(matches!(
            result.value(3),
            Err(ShardError::ColumnIndexOutOfRange { index: 3, count: 1 })
        ));
        assert!(!result.next().unwrap());
        assert!(!result.next().unwrap());
        assert_eq!(result.remaining(), 0);
    }
}
