use serde::{Deserialize, Serialize};
use shard_core::{Result, ShardError};
use shard_executor::ExecutorConfig;
use shard_route::{CacheConfig, ShardingRule, ShardingRuleConfig};
use std::path::Path;

/// Everything needed to stand up a [`crate::ShardingKernel`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Declared physical data sources, in routing order
    pub data_sources: Vec<String>,
    #[serde(default)]
    pub rule: ShardingRuleConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl KernelConfig {
    pub fn new<S: Into<String>>(data_sources: impl IntoIterator<Item = S>) -> Self {
        Self {
            data_sources: data_sources.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_rule(mut self, rule: ShardingRuleConfig) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: KernelConfig = serde_json::from_str(&contents)
            .map_err(|e| ShardError::Serialization(e.to_string()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| ShardError::Serialization(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Validate the rule configuration and build an immutable snapshot.
    pub fn build_rule(&self) -> Result<ShardingRule> {
        ShardingRule::new(self.data_sources.clone(), &self.rule, self.cache.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shard_executor::FailurePolicy;
    use shard_route::{AlgorithmConfig, StrategyConfig, TableRuleConfig};

    fn sample() -> KernelConfig {
        let rule = ShardingRuleConfig::new()
            .with_table(
                TableRuleConfig::new("t_order")
                    .with_actual_data_nodes("ds_${0..1}.t_order_${0..1}")
                    .with_database_strategy(StrategyConfig::standard("user_id", "db_mod"))
                    .with_table_strategy(StrategyConfig::standard("order_id", "table_mod")),
            )
            .with_algorithm(
                "db_mod",
                AlgorithmConfig::new("MOD").with_prop("sharding-count", 2),
            )
            .with_algorithm(
                "table_mod",
                AlgorithmConfig::new("MOD").with_prop("sharding-count", 2),
            );
        KernelConfig::new(["ds_0", "ds_1"])
            .with_rule(rule)
            .with_executor(ExecutorConfig::default().with_failure_policy(FailurePolicy::CollectAll))
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.json");
        let config = sample();
        config.save(&path).unwrap();

        let loaded = KernelConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.build_rule().is_ok());
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.json");
        std::fs::write(&path, r#"{ "data_sources": ["ds_0"] }"#).unwrap();

        let loaded = KernelConfig::from_file(&path).unwrap();
        assert_eq!(loaded.executor, ExecutorConfig::default());
        assert_eq!(loaded.cache, CacheConfig::default());
        assert!(loaded.rule.tables.is_empty());
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            KernelConfig::from_file(&missing),
            Err(ShardError::Io(_))
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            KernelConfig::from_file(&broken),
            Err(ShardError::Serialization(_))
        ));
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let mut config = sample();
        config.rule = config
            .rule
            .with_algorithm("db_mod", AlgorithmConfig::new("NO_SUCH_ALGORITHM"));
        assert!(matches!(
            config.build_rule(),
            Err(ShardError::ConfigurationError(_))
        ));
    }
}
