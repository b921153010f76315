//! Decorators layered over a base merge.

use crate::result::MergedResult;
use ahash::AHashSet;
use shard_core::{ColumnMetadata, Result, ShardError, Value};

/// Skips rows whose visible columns were already emitted.
pub struct DistinctMerge {
    inner: Box<dyn MergedResult>,
    visible: usize,
    seen: AHashSet<Vec<Value>>,
}

impl DistinctMerge {
    pub fn new(inner: Box<dyn MergedResult>, visible: usize) -> Self {
        Self {
            inner,
            visible,
            seen: AHashSet::new(),
        }
    }
}

impl MergedResult for DistinctMerge {
    fn next(&mut self) -> Result<bool> {
        while self.inner.next()? {
            let key = (0..self.visible)
                .map(|i| self.inner.value(i))
                .collect::<Result<Vec<_>>>()?;
            if self.seen.insert(key) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn value(&self, index: usize) -> Result<Value> {
        self.inner.value(index)
    }

    fn metadata(&self) -> &[ColumnMetadata] {
        self.inner.metadata()
    }
}

/// Applies the original OFFSET and LIMIT to the merged stream.
///
/// Once the limit is reached the wrapped merge is never advanced again.
pub struct PaginationMerge {
    inner: Box<dyn MergedResult>,
    skip: u64,
    remaining: Option<u64>,
}

impl PaginationMerge {
    pub fn new(inner: Box<dyn MergedResult>, offset: u64, row_count: Option<u64>) -> Self {
        Self {
            inner,
            skip: offset,
            remaining: row_count,
        }
    }
}

impl MergedResult for PaginationMerge {
    fn next(&mut self) -> Result<bool> {
        if self.remaining == Some(0) {
            return Ok(false);
        }
        while self.skip > 0 {
            if !self.inner.next()? {
                self.skip = 0;
                self.remaining = Some(0);
                return Ok(false);
            }
            self.skip -= 1;
        }
        if !self.inner.next()? {
            self.remaining = Some(0);
            return Ok(false);
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Ok(true)
    }

    fn value(&self, index: usize) -> Result<Value> {
        self.inner.value(index)
    }

    fn metadata(&self) -> &[ColumnMetadata] {
        self.inner.metadata()
    }
}

/// Hides the derived columns appended for merge bookkeeping.
pub struct TruncationMerge {
    inner: Box<dyn MergedResult>,
    metadata: Vec<ColumnMetadata>,
}

impl TruncationMerge {
    pub fn new(inner: Box<dyn MergedResult>, derived: usize) -> Self {
        let visible = inner.column_count().saturating_sub(derived);
        let metadata = inner.metadata()[..visible].to_vec();
        Self { inner, metadata }
    }
}

impl MergedResult for TruncationMerge {
    fn next(&mut self) -> Result<bool> {
        self.inner.next()
    }

    fn value(&self, index: usize) -> Result<Value> {
        if index >= self.metadata.len() {
            return Err(ShardError::ColumnIndexOutOfRange {
                index,
                count: self.metadata.len(),
            });
        }
        self.inner.value(index)
    }

    fn metadata(&self) -> &[ColumnMetadata] {
        &self.metadata
    }
}
