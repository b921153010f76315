use shard_core::{ColumnMetadata, QueryResult, Result, Value};

/// The logical result handed to the protocol encoder.
///
/// Same cursor contract as [`QueryResult`]: positioned before the first row,
/// `next` advances, zero-based column indexes.
pub trait MergedResult: Send {
    fn next(&mut self) -> Result<bool>;

    fn value(&self, index: usize) -> Result<Value>;

    fn metadata(&self) -> &[ColumnMetadata];

    fn column_count(&self) -> usize {
        self.metadata().len()
    }

    /// The current row, every column.
    fn row(&self) -> Result<Vec<Value>> {
        (0..self.column_count()).map(|i| self.value(i)).collect()
    }
}

/// Drain a merged result into rows.
pub fn collect_rows(result: &mut dyn MergedResult) -> Result<Vec<Vec<Value>>> {
    let mut rows = Vec::new();
    while result.next()? {
        rows.push(result.row()?);
    }
    Ok(rows)
}

pub(crate) fn read_row(result: &dyn QueryResult, column_count: usize) -> Result<Vec<Value>> {
    (0..column_count).map(|i| result.value(i)).collect()
}
