use super::{
    find_target_by_suffix, integer_value, push_unique, required_i64, unsupported, Props,
    ShardingAlgorithm, ShardingInput,
};
use crc32fast::Hasher;
use shard_core::{Result, ShardError, Value};

fn sharding_count(algorithm: &str, props: &Props) -> Result<i64> {
    let count = required_i64(algorithm, props, "sharding-count")?;
    if count <= 0 {
        return Err(ShardError::ConfigurationError(format!(
            "{} sharding algorithm requires a positive `sharding-count`, got {}",
            algorithm, count
        )));
    }
    Ok(count)
}

/// `value mod sharding-count`, matched against target suffixes.
#[derive(Debug, Clone)]
pub struct ModShardingAlgorithm {
    sharding_count: i64,
}

impl ModShardingAlgorithm {
    pub fn new(props: &Props) -> Result<Self> {
        Ok(Self {
            sharding_count: sharding_count("MOD", props)?,
        })
    }

    fn precise(&self, targets: &[String], value: &Value) -> Result<Option<String>> {
        let suffix = integer_value(value)?.rem_euclid(self.sharding_count);
        find_target_by_suffix(targets, &suffix.to_string())
    }
}

impl ShardingAlgorithm for ModShardingAlgorithm {
    fn algorithm_type(&self) -> &'static str {
        "MOD"
    }

    fn do_sharding(&self, targets: &[String], input: &ShardingInput<'_>) -> Result<Vec<String>> {
        match input {
            ShardingInput::Precise { value, .. } => {
                Ok(self.precise(targets, value)?.into_iter().collect())
            }
            ShardingInput::Range { range, .. } => {
                let (lower, upper) = range.int_bounds()?;
                let (lower, upper) = match (lower, upper) {
                    (Some(l), Some(u)) if u.saturating_sub(l) < self.sharding_count - 1 => (l, u),
                    _ => return Ok(targets.to_vec()),
                };
                let mut out = Vec::new();
                for value in lower..=upper {
                    if let Some(target) = self.precise(targets, &Value::Int64(value))? {
                        push_unique(&mut out, target);
                    }
                }
                Ok(out)
            }
            ShardingInput::Hint { values } => {
                let mut out = Vec::new();
                for value in values.iter() {
                    if let Some(target) = self.precise(targets, value)? {
                        push_unique(&mut out, target);
                    }
                }
                Ok(out)
            }
            ShardingInput::Complex { .. } => Err(unsupported(self, input)),
        }
    }
}

/// CRC32 of the value's canonical bytes, mod `sharding-count`.
#[derive(Debug, Clone)]
pub struct HashModShardingAlgorithm {
    sharding_count: i64,
}

impl HashModShardingAlgorithm {
    pub fn new(props: &Props) -> Result<Self> {
        Ok(Self {
            sharding_count: sharding_count("HASH_MOD", props)?,
        })
    }

    pub fn hash_index(&self, value: &Value) -> i64 {
        let mut hasher = Hasher::new();
        hasher.update(&value.canonical_bytes());
        (hasher.finalize() as i64).rem_euclid(self.sharding_count)
    }
}

impl ShardingAlgorithm for HashModShardingAlgorithm {
    fn algorithm_type(&self) -> &'static str {
        "HASH_MOD"
    }

    fn do_sharding(&self, targets: &[String], input: &ShardingInput<'_>) -> Result<Vec<String>> {
        match input {
            ShardingInput::Precise { value, .. } => {
                let suffix = self.hash_index(value).to_string();
                Ok(find_target_by_suffix(targets, &suffix)?.into_iter().collect())
            }
            // Hashing scatters any range over every target.
            ShardingInput::Range { .. } => Ok(targets.to_vec()),
            ShardingInput::Hint { values } => {
                let mut out = Vec::new();
                for value in values.iter() {
                    let suffix = self.hash_index(value).to_string();
                    if let Some(target) = find_target_by_suffix(targets, &suffix)? {
                        push_unique(&mut out, target);
                    }
                }
                Ok(out)
            }
            ShardingInput::Complex { .. } => Err(unsupported(self, input)),
        }
    }
}
