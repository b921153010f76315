use crate::algorithm::{create_algorithm, push_unique, ShardingAlgorithm, ShardingInput};
use crate::condition::{ColumnCondition, ShardingCondition};
use crate::config::{AlgorithmConfig, StrategyConfig};
use indexmap::IndexMap;
use shard_core::{Result, ShardError, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

pub type AlgorithmRegistry = HashMap<String, Arc<dyn ShardingAlgorithm>>;

/// Instantiate every configured algorithm once, keyed by its configured name.
pub fn build_algorithms(configs: &BTreeMap<String, AlgorithmConfig>) -> Result<AlgorithmRegistry> {
    let mut registry = AlgorithmRegistry::with_capacity(configs.len());
    for (name, config) in configs {
        let algorithm = create_algorithm(&config.algorithm_type, &config.props).map_err(|e| {
            ShardError::ConfigurationError(format!("sharding algorithm `{}`: {}", name, e))
        })?;
        registry.insert(name.clone(), algorithm);
    }
    Ok(registry)
}

/// The resolved strategy for one sharding dimension.
#[derive(Clone)]
pub enum ShardingStrategy {
    Standard {
        column: String,
        algorithm: Arc<dyn ShardingAlgorithm>,
    },
    Complex {
        columns: Vec<String>,
        algorithm: Arc<dyn ShardingAlgorithm>,
    },
    Hint {
        algorithm: Arc<dyn ShardingAlgorithm>,
    },
    None,
}

impl fmt::Debug for ShardingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardingStrategy::Standard { column, algorithm } => {
                write!(f, "Standard({}, {})", column, algorithm.algorithm_type())
            }
            ShardingStrategy::Complex { columns, algorithm } => {
                write!(f, "Complex({:?}, {})", columns, algorithm.algorithm_type())
            }
            ShardingStrategy::Hint { algorithm } => write!(f, "Hint({})", algorithm.algorithm_type()),
            ShardingStrategy::None => write!(f, "None"),
        }
    }
}

impl ShardingStrategy {
    pub fn from_config(config: &StrategyConfig, algorithms: &AlgorithmRegistry) -> Result<Self> {
        let lookup = |name: &str| {
            algorithms.get(name).cloned().ok_or_else(|| {
                ShardError::ConfigurationError(format!("unknown sharding algorithm `{}`", name))
            })
        };
        Ok(match config {
            StrategyConfig::Standard {
                sharding_column,
                algorithm_name,
            } => ShardingStrategy::Standard {
                column: sharding_column.clone(),
                algorithm: lookup(algorithm_name)?,
            },
            StrategyConfig::Complex {
                sharding_columns,
                algorithm_name,
            } => {
                if sharding_columns.is_empty() {
                    return Err(ShardError::ConfigurationError(format!(
                        "complex strategy with algorithm `{}` names no sharding columns",
                        algorithm_name
                    )));
                }
                ShardingStrategy::Complex {
                    columns: sharding_columns.clone(),
                    algorithm: lookup(algorithm_name)?,
                }
            }
            StrategyConfig::Hint { algorithm_name } => ShardingStrategy::Hint {
                algorithm: lookup(algorithm_name)?,
            },
            StrategyConfig::None => ShardingStrategy::None,
        })
    }

    pub fn columns(&self) -> Vec<String> {
        match self {
            ShardingStrategy::Standard { column, .. } => vec![column.clone()],
            ShardingStrategy::Complex { columns, .. } => columns.clone(),
            ShardingStrategy::Hint { .. } | ShardingStrategy::None => Vec::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ShardingStrategy::None)
    }

    /// Pick the targets for one AND-group. Hint values replace predicate
    /// values for standard and hint strategies; no usable value means every
    /// target is a candidate.
    pub fn do_sharding(
        &self,
        targets: &[String],
        condition: &ShardingCondition,
        hint: Option<&[Value]>,
    ) -> Result<Vec<String>> {
        match self {
            ShardingStrategy::None => Ok(targets.to_vec()),
            ShardingStrategy::Standard { column, algorithm } => {
                if let Some(values) = hint {
                    return precise(algorithm.as_ref(), targets, column, values);
                }
                match condition.get(column) {
                    None => Ok(targets.to_vec()),
                    Some(ColumnCondition::Values(values)) => {
                        precise(algorithm.as_ref(), targets, column, values)
                    }
                    Some(ColumnCondition::Range(range)) => {
                        algorithm.do_sharding(targets, &ShardingInput::Range { column, range })
                    }
                }
            }
            ShardingStrategy::Complex { columns, algorithm } => {
                let mut values = IndexMap::new();
                let mut ranges = IndexMap::new();
                for column in columns {
                    match condition.get(column) {
                        Some(ColumnCondition::Values(v)) => {
                            values.insert(column.clone(), v.clone());
                        }
                        Some(ColumnCondition::Range(r)) => {
                            ranges.insert(column.clone(), r.clone());
                        }
                        None => {}
                    }
                }
                if values.is_empty() && ranges.is_empty() {
                    return Ok(targets.to_vec());
                }
                algorithm.do_sharding(
                    targets,
                    &ShardingInput::Complex {
                        values: &values,
                        ranges: &ranges,
                    },
                )
            }
            ShardingStrategy::Hint { algorithm } => match hint {
                Some(values) if !values.is_empty() => {
                    algorithm.do_sharding(targets, &ShardingInput::Hint { values })
                }
                _ => Ok(targets.to_vec()),
            },
        }
    }
}

/// Route each precise value; one value may land on at most one target.
fn precise(
    algorithm: &dyn ShardingAlgorithm,
    targets: &[String],
    column: &str,
    values: &[Value],
) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for value in values {
        let routed = algorithm.do_sharding(targets, &ShardingInput::Precise { column, value })?;
        if routed.len() > 1 {
            return Err(ShardError::ConfigurationError(format!(
                "{} algorithm routed {}={} to {} targets ({})",
                algorithm.algorithm_type(),
                column,
                value,
                routed.len(),
                routed.join(", ")
            )));
        }
        for target in routed {
            push_unique(&mut out, target);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ValueRange;

    fn registry() -> AlgorithmRegistry {
        let mut configs = BTreeMap::new();
        configs.insert(
            "mod2".to_string(),
            AlgorithmConfig::new("MOD").with_prop("sharding-count", 2),
        );
        configs.insert(
            "hint".to_string(),
            AlgorithmConfig::new("HINT_INLINE").with_prop("algorithm-expression", "ds_${value}"),
        );
        build_algorithms(&configs).unwrap()
    }

    fn targets() -> Vec<String> {
        vec!["ds_0".to_string(), "ds_1".to_string()]
    }

    #[test]
    fn test_unknown_algorithm_name() {
        let err = ShardingStrategy::from_config(&StrategyConfig::standard("id", "nope"), &registry())
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_standard_without_condition_routes_everywhere() {
        let strategy =
            ShardingStrategy::from_config(&StrategyConfig::standard("user_id", "mod2"), &registry())
                .unwrap();
        let routed = strategy
            .do_sharding(&targets(), &ShardingCondition::new(), None)
            .unwrap();
        assert_eq!(routed, targets());
    }

    #[test]
    fn test_standard_values_and_range() {
        let strategy =
            ShardingStrategy::from_config(&StrategyConfig::standard("user_id", "mod2"), &registry())
                .unwrap();
        let mut condition = ShardingCondition::new();
        condition.add(
            "USER_ID",
            ColumnCondition::Values(vec![Value::Int64(3), Value::Int64(5)]),
        );
        assert_eq!(
            strategy.do_sharding(&targets(), &condition, None).unwrap(),
            vec!["ds_1"]
        );

        let mut condition = ShardingCondition::new();
        condition.add(
            "user_id",
            ColumnCondition::Range(ValueRange::closed(Value::Int64(2), Value::Int64(2))),
        );
        assert_eq!(
            strategy.do_sharding(&targets(), &condition, None).unwrap(),
            vec!["ds_0"]
        );
    }

    #[test]
    fn test_hint_overrides_predicates() {
        let strategy =
            ShardingStrategy::from_config(&StrategyConfig::standard("user_id", "mod2"), &registry())
                .unwrap();
        let mut condition = ShardingCondition::new();
        condition.add("user_id", ColumnCondition::Values(vec![Value::Int64(1)]));
        let hint = vec![Value::Int64(2)];
        assert_eq!(
            strategy
                .do_sharding(&targets(), &condition, Some(&hint))
                .unwrap(),
            vec!["ds_0"]
        );
    }

    #[test]
    fn test_hint_strategy() {
        let strategy = ShardingStrategy::from_config(
            &StrategyConfig::Hint {
                algorithm_name: "hint".to_string(),
            },
            &registry(),
        )
        .unwrap();
        let hint = vec![Value::Int64(1)];
        assert_eq!(
            strategy
                .do_sharding(&targets(), &ShardingCondition::new(), Some(&hint))
                .unwrap(),
            vec!["ds_1"]
        );
        assert_eq!(
            strategy
                .do_sharding(&targets(), &ShardingCondition::new(), None)
                .unwrap()
                .len(),
            2
        );
    }
}
