//! Group-by and aggregate merges.
//!
//! When ORDER BY lists exactly the GROUP BY keys every shard returns its
//! groups in the same order, so groups can be folded while streaming out of
//! an [`OrderByStreamMerge`]. Anything else drains every shard into memory.

use crate::aggregation::{create_unit, AggregationUnit};
use crate::orderby::{compare_keys, OrderByStreamMerge, SortKey};
use crate::result::{read_row, MergedResult};
use ahash::RandomState;
use indexmap::IndexMap;
use shard_core::{AggregationType, ColumnMetadata, QueryResult, Result, ShardError, Value};
use std::cmp::Ordering;

/// One aggregate projection bound to physical column indexes.
#[derive(Debug, Clone)]
pub struct AggregationSlot {
    pub kind: AggregationType,
    /// Column the merged value is written to.
    pub output: usize,
    /// Columns fed to the unit: the output column itself, or the derived
    /// count and sum columns for AVG.
    pub inputs: Vec<usize>,
}

/// Accumulators for one group.
struct GroupState {
    row: Vec<Value>,
    units: Vec<Box<dyn AggregationUnit>>,
}

impl GroupState {
    fn new(row: Vec<Value>, slots: &[AggregationSlot]) -> Result<Self> {
        let mut state = Self {
            row,
            units: slots.iter().map(|s| create_unit(s.kind)).collect(),
        };
        let first = state.row.clone();
        state.fold(&first, slots)?;
        Ok(state)
    }

    fn fold(&mut self, row: &[Value], slots: &[AggregationSlot]) -> Result<()> {
        for (unit, slot) in self.units.iter_mut().zip(slots) {
            let values = slot
                .inputs
                .iter()
                .map(|&i| {
                    row.get(i).cloned().ok_or(ShardError::ColumnIndexOutOfRange {
                        index: i,
                        count: row.len(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            unit.merge(&values)?;
        }
        Ok(())
    }

    fn finish(mut self, slots: &[AggregationSlot]) -> Vec<Value> {
        for (unit, slot) in self.units.iter().zip(slots) {
            if let Some(cell) = self.row.get_mut(slot.output) {
                *cell = unit.result();
            }
        }
        self.row
    }
}

fn group_key(row: &[Value], keys: &[SortKey]) -> Vec<Value> {
    keys.iter()
        .map(|k| row.get(k.index).cloned().unwrap_or(Value::Null))
        .collect()
}

fn cell(row: Option<&Vec<Value>>, index: usize) -> Result<Value> {
    let row = row.ok_or_else(|| ShardError::ColumnNotFound("cursor is not on a row".to_string()))?;
    row.get(index)
        .cloned()
        .ok_or(ShardError::ColumnIndexOutOfRange {
            index,
            count: row.len(),
        })
}

/// Folds contiguous groups out of an order-by stream merge.
pub struct GroupByStreamMerge {
    source: OrderByStreamMerge,
    group_keys: Vec<SortKey>,
    slots: Vec<AggregationSlot>,
    pending: Option<Vec<Value>>,
    current: Option<Vec<Value>>,
    started: bool,
}

impl GroupByStreamMerge {
    pub fn new(
        results: Vec<Box<dyn QueryResult>>,
        metadata: Vec<ColumnMetadata>,
        group_keys: Vec<SortKey>,
        slots: Vec<AggregationSlot>,
    ) -> Self {
        Self {
            source: OrderByStreamMerge::new(results, metadata, group_keys.clone()),
            group_keys,
            slots,
            pending: None,
            current: None,
            started: false,
        }
    }

    fn pull(&mut self) -> Result<Option<Vec<Value>>> {
        if self.source.next()? {
            Ok(Some(self.source.row()?))
        } else {
            Ok(None)
        }
    }
}

impl MergedResult for GroupByStreamMerge {
    fn next(&mut self) -> Result<bool> {
        if !self.started {
            self.started = true;
            self.pending = self.pull()?;
        }
        let Some(first) = self.pending.take() else {
            self.current = None;
            return Ok(false);
        };
        let key = group_key(&first, &self.group_keys);
        let mut state = GroupState::new(first, &self.slots)?;
        while let Some(row) = self.pull()? {
            let next_key = group_key(&row, &self.group_keys);
            if compare_keys(&self.group_keys, &key, &next_key) == Ordering::Equal {
                state.fold(&row, &self.slots)?;
            } else {
                self.pending = Some(row);
                break;
            }
        }
        self.current = Some(state.finish(&self.slots));
        Ok(true)
    }

    fn value(&self, index: usize) -> Result<Value> {
        cell(self.current.as_ref(), index)
    }

    fn metadata(&self) -> &[ColumnMetadata] {
        self.source.metadata()
    }
}

/// Drains every shard, groups in first-seen order, then sorts by ORDER BY.
pub struct GroupByMemoryMerge {
    metadata: Vec<ColumnMetadata>,
    rows: std::vec::IntoIter<Vec<Value>>,
    current: Option<Vec<Value>>,
}

impl GroupByMemoryMerge {
    pub fn new(
        mut results: Vec<Box<dyn QueryResult>>,
        metadata: Vec<ColumnMetadata>,
        group_keys: &[SortKey],
        order_keys: &[SortKey],
        slots: &[AggregationSlot],
    ) -> Result<Self> {
        let column_count = metadata.len();
        let mut groups: IndexMap<Vec<Value>, GroupState, RandomState> =
            IndexMap::with_hasher(RandomState::new());
        for result in results.iter_mut() {
            while result.next()? {
                let row = read_row(result.as_ref(), column_count)?;
                let key = group_key(&row, group_keys);
                match groups.get_mut(&key) {
                    Some(state) => state.fold(&row, slots)?,
                    None => {
                        groups.insert(key, GroupState::new(row, slots)?);
                    }
                }
            }
        }
        tracing::debug!(groups = groups.len(), "Grouped rows in memory");

        let mut rows: Vec<Vec<Value>> = groups
            .into_values()
            .map(|state| state.finish(slots))
            .collect();
        if !order_keys.is_empty() {
            rows.sort_by(|a, b| {
                compare_keys(order_keys, &group_key(a, order_keys), &group_key(b, order_keys))
            });
        }
        Ok(Self {
            metadata,
            rows: rows.into_iter(),
            current: None,
        })
    }
}

impl MergedResult for GroupByMemoryMerge {
    fn next(&mut self) -> Result<bool> {
        self.current = self.rows.next();
        Ok(self.current.is_some())
    }

    fn value(&self, index: usize) -> Result<Value> {
        cell(self.current.as_ref(), index)
    }

    fn metadata(&self) -> &[ColumnMetadata] {
        &self.metadata
    }
}
