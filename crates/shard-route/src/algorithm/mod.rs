//! Sharding algorithms.
//!
//! Algorithms are instantiated once when a rule is loaded and shared as
//! `Arc<dyn ShardingAlgorithm>`; routing never looks at type names again.

mod inline;
mod modulo;
mod range;

pub use inline::{ComplexInlineShardingAlgorithm, HintInlineShardingAlgorithm, InlineShardingAlgorithm};
pub use modulo::{HashModShardingAlgorithm, ModShardingAlgorithm};
pub use range::{BoundaryRangeShardingAlgorithm, VolumeRangeShardingAlgorithm};

use crate::condition::ValueRange;
use indexmap::IndexMap;
use shard_core::{Result, ShardError, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Algorithm properties as configured, e.g. `{"sharding-count": 4}`.
pub type Props = BTreeMap<String, serde_json::Value>;

/// The sharding value handed to an algorithm.
#[derive(Debug, Clone, Copy)]
pub enum ShardingInput<'a> {
    Precise {
        column: &'a str,
        value: &'a Value,
    },
    Range {
        column: &'a str,
        range: &'a ValueRange,
    },
    /// Every constrained column of a complex strategy at once.
    Complex {
        values: &'a IndexMap<String, Vec<Value>>,
        ranges: &'a IndexMap<String, ValueRange>,
    },
    Hint {
        values: &'a [Value],
    },
}

impl ShardingInput<'_> {
    fn kind(&self) -> &'static str {
        match self {
            ShardingInput::Precise { .. } => "precise",
            ShardingInput::Range { .. } => "range",
            ShardingInput::Complex { .. } => "complex",
            ShardingInput::Hint { .. } => "hint",
        }
    }
}

/// Maps a sharding value onto the available target names (data sources or
/// actual tables). Results are a subset of `targets`.
pub trait ShardingAlgorithm: Send + Sync + fmt::Debug {
    fn algorithm_type(&self) -> &'static str;

    fn do_sharding(&self, targets: &[String], input: &ShardingInput<'_>) -> Result<Vec<String>>;
}

pub(crate) fn unsupported(algorithm: &dyn ShardingAlgorithm, input: &ShardingInput<'_>) -> ShardError {
    ShardError::ConfigurationError(format!(
        "{} sharding algorithm does not support {} sharding values",
        algorithm.algorithm_type(),
        input.kind()
    ))
}

/// Create an algorithm from its configured type name and properties.
pub fn create_algorithm(algorithm_type: &str, props: &Props) -> Result<Arc<dyn ShardingAlgorithm>> {
    let algorithm: Arc<dyn ShardingAlgorithm> = match algorithm_type.to_ascii_uppercase().as_str() {
        "MOD" => Arc::new(ModShardingAlgorithm::new(props)?),
        "HASH_MOD" => Arc::new(HashModShardingAlgorithm::new(props)?),
        "VOLUME_RANGE" => Arc::new(VolumeRangeShardingAlgorithm::new(props)?),
        "BOUNDARY_RANGE" => Arc::new(BoundaryRangeShardingAlgorithm::new(props)?),
        "INLINE" => Arc::new(InlineShardingAlgorithm::new(props)?),
        "COMPLEX_INLINE" => Arc::new(ComplexInlineShardingAlgorithm::new(props)?),
        "HINT_INLINE" => Arc::new(HintInlineShardingAlgorithm::new(props)?),
        other => {
            return Err(ShardError::ConfigurationError(format!(
                "unknown sharding algorithm type `{}`",
                other
            )))
        }
    };
    Ok(algorithm)
}

pub(crate) fn prop_string(props: &Props, key: &str) -> Option<String> {
    match props.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

pub(crate) fn required_string(algorithm: &str, props: &Props, key: &str) -> Result<String> {
    prop_string(props, key).ok_or_else(|| {
        ShardError::ConfigurationError(format!(
            "{} sharding algorithm requires property `{}`",
            algorithm, key
        ))
    })
}

pub(crate) fn required_i64(algorithm: &str, props: &Props, key: &str) -> Result<i64> {
    let raw = required_string(algorithm, props, key)?;
    raw.trim().parse().map_err(|_| {
        ShardError::ConfigurationError(format!(
            "{} sharding algorithm property `{}` must be an integer, got `{}`",
            algorithm, key, raw
        ))
    })
}

pub(crate) fn prop_bool(props: &Props, key: &str) -> bool {
    match props.get(key) {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Find the target whose name ends with `suffix` as a whole number, so that
/// suffix `1` matches `t_order_1` but not `t_order_11`.
pub(crate) fn find_target_by_suffix(targets: &[String], suffix: &str) -> Result<Option<String>> {
    let mut matched = targets.iter().filter(|target| {
        target.len() > suffix.len()
            && target.ends_with(suffix)
            && !target.as_bytes()[target.len() - suffix.len() - 1].is_ascii_digit()
    });
    let first = matched.next();
    if let Some(second) = matched.next() {
        return Err(ShardError::ConfigurationError(format!(
            "sharding suffix `{}` matches more than one target ({}, {})",
            suffix,
            first.map(String::as_str).unwrap_or_default(),
            second
        )));
    }
    Ok(first.cloned())
}

/// Find a target by exact (case-insensitive) name.
pub(crate) fn find_target_by_name(targets: &[String], name: &str) -> Option<String> {
    targets
        .iter()
        .find(|target| target.eq_ignore_ascii_case(name))
        .cloned()
}

pub(crate) fn push_unique(out: &mut Vec<String>, target: String) {
    if !out.contains(&target) {
        out.push(target);
    }
}

pub(crate) fn integer_value(value: &Value) -> Result<i64> {
    value.as_i64().ok_or_else(|| ShardError::TypeMismatch {
        expected: "integer sharding value".to_string(),
        found: value.data_type().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, serde_json::Value)]) -> Props {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_registry_creates_by_type() {
        let algorithm = create_algorithm("mod", &props(&[("sharding-count", 4.into())])).unwrap();
        assert_eq!(algorithm.algorithm_type(), "MOD");
        assert!(create_algorithm("NO_SUCH", &Props::new()).is_err());
    }

    #[test]
    fn test_missing_property_is_configuration_error() {
        let err = create_algorithm("MOD", &Props::new()).unwrap_err();
        assert!(matches!(err, ShardError::ConfigurationError(_)));
        assert!(err.to_string().contains("sharding-count"));
    }

    #[test]
    fn test_suffix_matching_respects_digits() {
        let targets: Vec<String> = (0..12).map(|i| format!("t_order_{}", i)).collect();
        assert_eq!(
            find_target_by_suffix(&targets, "1").unwrap(),
            Some("t_order_1".to_string())
        );
        assert_eq!(find_target_by_suffix(&targets, "12").unwrap(), None);

        let ambiguous = vec!["t_order_1".to_string(), "t_item_1".to_string()];
        assert!(find_target_by_suffix(&ambiguous, "1").is_err());
    }

    #[test]
    fn test_string_props() {
        let p = props(&[
            ("sharding-count", "8".into()),
            ("allow-range-query-with-inline-sharding", "TRUE".into()),
        ]);
        assert_eq!(required_i64("MOD", &p, "sharding-count").unwrap(), 8);
        assert!(prop_bool(&p, "allow-range-query-with-inline-sharding"));
    }
}
