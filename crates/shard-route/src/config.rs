//! Serializable sharding rule configuration

use crate::algorithm::Props;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named algorithm definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    /// Registry type name, e.g. `MOD` or `INLINE`
    #[serde(rename = "type")]
    pub algorithm_type: String,
    #[serde(default)]
    pub props: Props,
}

impl AlgorithmConfig {
    pub fn new(algorithm_type: impl Into<String>) -> Self {
        Self {
            algorithm_type: algorithm_type.into(),
            props: Props::new(),
        }
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }
}

/// How one dimension (database or table) of a logical table is sharded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Standard {
        sharding_column: String,
        algorithm_name: String,
    },
    Complex {
        sharding_columns: Vec<String>,
        algorithm_name: String,
    },
    Hint {
        algorithm_name: String,
    },
    None,
}

impl StrategyConfig {
    pub fn standard(column: impl Into<String>, algorithm: impl Into<String>) -> Self {
        StrategyConfig::Standard {
            sharding_column: column.into(),
            algorithm_name: algorithm.into(),
        }
    }

    pub fn algorithm_name(&self) -> Option<&str> {
        match self {
            StrategyConfig::Standard { algorithm_name, .. }
            | StrategyConfig::Complex { algorithm_name, .. }
            | StrategyConfig::Hint { algorithm_name } => Some(algorithm_name),
            StrategyConfig::None => None,
        }
    }
}

/// One logical table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRuleConfig {
    pub logic_table: String,
    /// Inline expression such as `ds_${0..1}.t_order_${0..3}`. When omitted
    /// the table lives once on every data source under its logical name.
    #[serde(default)]
    pub actual_data_nodes: Option<String>,
    #[serde(default)]
    pub database_strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub table_strategy: Option<StrategyConfig>,
}

impl TableRuleConfig {
    pub fn new(logic_table: impl Into<String>) -> Self {
        Self {
            logic_table: logic_table.into(),
            actual_data_nodes: None,
            database_strategy: None,
            table_strategy: None,
        }
    }

    pub fn with_actual_data_nodes(mut self, expression: impl Into<String>) -> Self {
        self.actual_data_nodes = Some(expression.into());
        self
    }

    pub fn with_database_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.database_strategy = Some(strategy);
        self
    }

    pub fn with_table_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.table_strategy = Some(strategy);
        self
    }
}

/// The whole sharding rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardingRuleConfig {
    #[serde(default)]
    pub tables: Vec<TableRuleConfig>,
    /// Each entry is one group, comma separated: `"t_order, t_order_item"`
    #[serde(default)]
    pub binding_tables: Vec<String>,
    #[serde(default)]
    pub broadcast_tables: Vec<String>,
    #[serde(default)]
    pub sharding_algorithms: BTreeMap<String, AlgorithmConfig>,
    #[serde(default)]
    pub default_database_strategy: Option<StrategyConfig>,
    #[serde(default)]
    pub default_table_strategy: Option<StrategyConfig>,
    /// Data source for tables no rule covers
    #[serde(default)]
    pub default_data_source: Option<String>,
}

impl ShardingRuleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: TableRuleConfig) -> Self {
        self.tables.push(table);
        self
    }

    pub fn with_algorithm(mut self, name: impl Into<String>, algorithm: AlgorithmConfig) -> Self {
        self.sharding_algorithms.insert(name.into(), algorithm);
        self
    }

    pub fn with_binding_group(mut self, tables: &[&str]) -> Self {
        self.binding_tables.push(tables.join(","));
        self
    }

    pub fn with_broadcast_table(mut self, table: impl Into<String>) -> Self {
        self.broadcast_tables.push(table.into());
        self
    }

    pub fn with_default_data_source(mut self, data_source: impl Into<String>) -> Self {
        self.default_data_source = Some(data_source.into());
        self
    }
}
