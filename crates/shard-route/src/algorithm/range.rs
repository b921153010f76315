use super::{
    find_target_by_suffix, integer_value, push_unique, required_i64, required_string,
    unsupported, Props, ShardingAlgorithm, ShardingInput,
};
use shard_core::{Result, ShardError};

/// Half-open integer partitions `[lower, upper)`; partition `i` maps to suffix `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Partitions {
    ranges: Vec<(Option<i64>, Option<i64>)>,
}

impl Partitions {
    /// Partitions split at the given ascending boundaries.
    fn from_boundaries(boundaries: &[i64]) -> Self {
        let mut ranges = Vec::with_capacity(boundaries.len() + 1);
        let mut previous = None;
        for boundary in boundaries {
            ranges.push((previous, Some(*boundary)));
            previous = Some(*boundary);
        }
        ranges.push((previous, None));
        Self { ranges }
    }

    fn partition_of(&self, value: i64) -> Option<usize> {
        self.ranges.iter().position(|(lower, upper)| {
            lower.map(|l| value >= l).unwrap_or(true) && upper.map(|u| value < u).unwrap_or(true)
        })
    }

    /// Partitions intersecting the inclusive range `[lower, upper]`.
    fn overlapping(&self, lower: Option<i64>, upper: Option<i64>) -> Vec<usize> {
        self.ranges
            .iter()
            .enumerate()
            .filter(|(_, (p_lower, p_upper))| {
                let below_end = match (lower, p_upper) {
                    (Some(l), Some(pu)) => l < *pu,
                    _ => true,
                };
                let above_start = match (upper, p_lower) {
                    (Some(u), Some(pl)) => u >= *pl,
                    _ => true,
                };
                below_end && above_start
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn do_sharding(
        &self,
        algorithm: &dyn ShardingAlgorithm,
        targets: &[String],
        input: &ShardingInput<'_>,
    ) -> Result<Vec<String>> {
        let ids = match input {
            ShardingInput::Precise { value, .. } => {
                self.partition_of(integer_value(value)?).into_iter().collect()
            }
            ShardingInput::Range { range, .. } => {
                let (lower, upper) = range.int_bounds()?;
                self.overlapping(lower, upper)
            }
            ShardingInput::Hint { values } => {
                let mut ids = Vec::new();
                for value in values.iter() {
                    if let Some(id) = self.partition_of(integer_value(value)?) {
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                }
                ids
            }
            ShardingInput::Complex { .. } => return Err(unsupported(algorithm, input)),
        };
        let mut out = Vec::new();
        for id in ids {
            if let Some(target) = find_target_by_suffix(targets, &id.to_string())? {
                push_unique(&mut out, target);
            }
        }
        Ok(out)
    }
}

/// Fixed-volume partitions between `range-lower` and `range-upper`, plus one
/// partition below and one above.
#[derive(Debug, Clone)]
pub struct VolumeRangeShardingAlgorithm {
    partitions: Partitions,
}

impl VolumeRangeShardingAlgorithm {
    pub fn new(props: &Props) -> Result<Self> {
        let lower = required_i64("VOLUME_RANGE", props, "range-lower")?;
        let upper = required_i64("VOLUME_RANGE", props, "range-upper")?;
        let volume = required_i64("VOLUME_RANGE", props, "sharding-volume")?;
        if volume <= 0 || upper <= lower {
            return Err(ShardError::ConfigurationError(format!(
                "VOLUME_RANGE requires range-lower < range-upper and a positive volume (got {}, {}, {})",
                lower, upper, volume
            )));
        }
        let mut boundaries = Vec::new();
        let mut boundary = lower;
        while boundary < upper {
            boundaries.push(boundary);
            boundary = boundary.saturating_add(volume);
        }
        boundaries.push(upper);
        Ok(Self {
            partitions: Partitions::from_boundaries(&boundaries),
        })
    }
}

impl ShardingAlgorithm for VolumeRangeShardingAlgorithm {
    fn algorithm_type(&self) -> &'static str {
        "VOLUME_RANGE"
    }

    fn do_sharding(&self, targets: &[String], input: &ShardingInput<'_>) -> Result<Vec<String>> {
        self.partitions.do_sharding(self, targets, input)
    }
}

/// Partitions split at the comma-separated `sharding-ranges` boundaries.
#[derive(Debug, Clone)]
pub struct BoundaryRangeShardingAlgorithm {
    partitions: Partitions,
}

impl BoundaryRangeShardingAlgorithm {
    pub fn new(props: &Props) -> Result<Self> {
        let raw = required_string("BOUNDARY_RANGE", props, "sharding-ranges")?;
        let mut boundaries = Vec::new();
        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let boundary: i64 = item.parse().map_err(|_| {
                ShardError::ConfigurationError(format!(
                    "BOUNDARY_RANGE boundary `{}` is not an integer",
                    item
                ))
            })?;
            if boundaries.last().map(|last| boundary <= *last).unwrap_or(false) {
                return Err(ShardError::ConfigurationError(format!(
                    "BOUNDARY_RANGE boundaries must ascend: `{}`",
                    raw
                )));
            }
            boundaries.push(boundary);
        }
        if boundaries.is_empty() {
            return Err(ShardError::ConfigurationError(
                "BOUNDARY_RANGE requires at least one boundary".to_string(),
            ));
        }
        Ok(Self {
            partitions: Partitions::from_boundaries(&boundaries),
        })
    }
}

impl ShardingAlgorithm for BoundaryRangeShardingAlgorithm {
    fn algorithm_type(&self) -> &'static str {
        "BOUNDARY_RANGE"
    }

    fn do_sharding(&self, targets: &[String], input: &ShardingInput<'_>) -> Result<Vec<String>> {
        self.partitions.do_sharding(self, targets, input)
    }
}
