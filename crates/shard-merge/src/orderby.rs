//! k-way merge of unit cursors that are each sorted by the same keys.

use crate::result::MergedResult;
use shard_core::{ColumnMetadata, QueryResult, Result, ShardError, SortItem, Value};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

/// A sort item bound to a physical column index.
#[derive(Debug, Clone)]
pub struct SortKey {
    pub item: SortItem,
    pub index: usize,
}

pub(crate) fn compare_keys(keys: &[SortKey], a: &[Value], b: &[Value]) -> Ordering {
    for (key, (x, y)) in keys.iter().zip(a.iter().zip(b)) {
        match key.item.compare(x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Head of one unit cursor inside the heap.
struct Head {
    result: usize,
    values: Vec<Value>,
    keys: Arc<[SortKey]>,
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Head {
    // BinaryHeap is a max-heap: reverse so the smallest key pops first, and
    // ties go to the earlier unit.
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.keys, &self.values, &other.values)
            .then_with(|| self.result.cmp(&other.result))
            .reverse()
    }
}

pub struct OrderByStreamMerge {
    results: Vec<Box<dyn QueryResult>>,
    metadata: Vec<ColumnMetadata>,
    keys: Arc<[SortKey]>,
    heap: BinaryHeap<Head>,
    current: Option<usize>,
    started: bool,
}

impl OrderByStreamMerge {
    pub fn new(
        results: Vec<Box<dyn QueryResult>>,
        metadata: Vec<ColumnMetadata>,
        keys: Vec<SortKey>,
    ) -> Self {
        Self {
            results,
            metadata,
            keys: keys.into(),
            heap: BinaryHeap::new(),
            current: None,
            started: false,
        }
    }

    fn push_head(&mut self, result: usize) -> Result<()> {
        let cursor = &mut self.results[result];
        if cursor.next()? {
            let values = self
                .keys
                .iter()
                .map(|k| cursor.value(k.index))
                .collect::<Result<Vec<_>>>()?;
            self.heap.push(Head {
                result,
                values,
                keys: Arc::clone(&self.keys),
            });
        }
        Ok(())
    }
}

impl MergedResult for OrderByStreamMerge {
    fn next(&mut self) -> Result<bool> {
        if !self.started {
            self.started = true;
            for result in 0..self.results.len() {
                self.push_head(result)?;
            }
        } else if let Some(previous) = self.current {
            self.push_head(previous)?;
        }
        self.current = self.heap.pop().map(|head| head.result);
        Ok(self.current.is_some())
    }

    fn value(&self, index: usize) -> Result<Value> {
        match self.current {
            Some(result) => self.results[result].value(index),
            None => Err(ShardError::ColumnNotFound("cursor is not on a row".to_string())),
        }
    }

    fn metadata(&self) -> &[ColumnMetadata] {
        &self.metadata
    }
}
