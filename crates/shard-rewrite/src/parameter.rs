//! Per-unit parameter lists.

use shard_core::{InsertValuesSegment, Value};
use std::collections::HashSet;

/// Old parameter index -> index in a unit's rebuilt list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterMapping {
    targets: Vec<Option<usize>>,
}

impl ParameterMapping {
    pub fn identity(count: usize) -> Self {
        Self {
            targets: (0..count).map(Some).collect(),
        }
    }

    /// Drop the parameters that only occur in insert rows this unit does not
    /// keep; the survivors are renumbered densely in their original order.
    pub fn for_insert_rows(count: usize, insert: &InsertValuesSegment, kept_rows: &[usize]) -> Self {
        let kept: HashSet<usize> = kept_rows.iter().copied().collect();
        let mut dropped = HashSet::new();
        for (row_index, row) in insert.rows.iter().enumerate() {
            if !kept.contains(&row_index) {
                dropped.extend(row.parameter_indices());
            }
        }
        let mut next = 0;
        let targets = (0..count)
            .map(|index| {
                if dropped.contains(&index) {
                    None
                } else {
                    next += 1;
                    Some(next - 1)
                }
            })
            .collect();
        Self { targets }
    }

    pub fn map(&self, index: usize) -> Option<usize> {
        self.targets.get(index).copied().flatten()
    }

    pub fn is_identity(&self) -> bool {
        self.targets
            .iter()
            .enumerate()
            .all(|(i, target)| *target == Some(i))
    }

    /// Rebuild the parameter list: overrides first, then drop and reorder.
    pub fn apply(&self, params: &[Value], overrides: &[(usize, Value)]) -> Vec<Value> {
        let mut source = params.to_vec();
        for (index, value) in overrides {
            if let Some(slot) = source.get_mut(*index) {
                *slot = value.clone();
            }
        }
        let mut out: Vec<Option<Value>> = vec![None; self.targets.iter().flatten().count()];
        for (index, value) in source.into_iter().enumerate() {
            match self.targets.get(index) {
                Some(Some(target)) => {
                    if let Some(slot) = out.get_mut(*target) {
                        *slot = Some(value);
                    }
                }
                Some(None) => {}
                // Parameters beyond the markers the binder saw pass through.
                None => out.push(Some(value)),
            }
        }
        out.into_iter().flatten().collect()
    }
}
