use crate::result::MergedResult;
use shard_core::{ColumnMetadata, QueryResult, Result, ShardError, Value};

/// Concatenates unit cursors one after another.
pub struct IteratorMerge {
    results: Vec<Box<dyn QueryResult>>,
    metadata: Vec<ColumnMetadata>,
    current: usize,
    on_row: bool,
}

impl IteratorMerge {
    pub fn new(results: Vec<Box<dyn QueryResult>>, metadata: Vec<ColumnMetadata>) -> Self {
        Self {
            results,
            metadata,
            current: 0,
            on_row: false,
        }
    }
}

impl MergedResult for IteratorMerge {
    fn next(&mut self) -> Result<bool> {
        while let Some(result) = self.results.get_mut(self.current) {
            if result.next()? {
                self.on_row = true;
                return Ok(true);
            }
            self.current += 1;
        }
        self.on_row = false;
        Ok(false)
    }

    fn value(&self, index: usize) -> Result<Value> {
        match self.results.get(self.current) {
            Some(result) if self.on_row => result.value(index),
            _ => Err(ShardError::ColumnNotFound("cursor is not on a row".to_string())),
        }
    }

    fn metadata(&self) -> &[ColumnMetadata] {
        &self.metadata
    }
}
