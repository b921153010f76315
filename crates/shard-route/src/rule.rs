//! The immutable rule model built from [`ShardingRuleConfig`].

use crate::cache::{CacheConfig, RouteCache};
use crate::config::{ShardingRuleConfig, StrategyConfig, TableRuleConfig};
use crate::expression;
use crate::strategy::{build_algorithms, AlgorithmRegistry, ShardingStrategy};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use shard_core::{Result, ShardError};
use std::fmt;

/// A concrete (data source, actual table) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataNode {
    pub data_source: String,
    pub table: String,
}

impl DataNode {
    pub fn new(data_source: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            table: table.into(),
        }
    }

    /// Parse `ds_0.t_order_0`
    pub fn parse(text: &str) -> Result<Self> {
        match text.trim().split_once('.') {
            Some((ds, table)) if !ds.is_empty() && !table.is_empty() => Ok(Self::new(ds, table)),
            _ => Err(ShardError::ConfigurationError(format!(
                "data node `{}` must be written as <data_source>.<table>",
                text
            ))),
        }
    }
}

impl fmt::Display for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.data_source, self.table)
    }
}

/// One logical table's physical shape
#[derive(Debug, Clone)]
pub struct TableRule {
    pub logic_table: String,
    pub database_strategy: ShardingStrategy,
    pub table_strategy: ShardingStrategy,
    actual_data_nodes: Vec<DataNode>,
    /// Actual tables per data source, both in configuration order
    tables_by_data_source: IndexMap<String, Vec<String>>,
}

impl TableRule {
    fn new(
        config: &TableRuleConfig,
        data_sources: &[String],
        default_database_strategy: &ShardingStrategy,
        default_table_strategy: &ShardingStrategy,
        algorithms: &AlgorithmRegistry,
    ) -> Result<Self> {
        let actual_data_nodes = match &config.actual_data_nodes {
            Some(expression) => expression::expand(expression)?
                .iter()
                .map(|node| DataNode::parse(node))
                .collect::<Result<Vec<_>>>()?,
            None => data_sources
                .iter()
                .map(|ds| DataNode::new(ds.clone(), config.logic_table.clone()))
                .collect(),
        };
        if actual_data_nodes.is_empty() {
            return Err(ShardError::ConfigurationError(format!(
                "table `{}` has no actual data nodes",
                config.logic_table
            )));
        }
        let mut tables_by_data_source: IndexMap<String, Vec<String>> = IndexMap::new();
        for node in &actual_data_nodes {
            if !data_sources.iter().any(|ds| ds == &node.data_source) {
                return Err(ShardError::ConfigurationError(format!(
                    "table `{}` references undeclared data source `{}`",
                    config.logic_table, node.data_source
                )));
            }
            let tables = tables_by_data_source
                .entry(node.data_source.clone())
                .or_default();
            if !tables.contains(&node.table) {
                tables.push(node.table.clone());
            }
        }
        let strategy = |configured: &Option<StrategyConfig>, default: &ShardingStrategy| match configured {
            Some(config) => ShardingStrategy::from_config(config, algorithms),
            None => Ok(default.clone()),
        };
        Ok(Self {
            logic_table: config.logic_table.clone(),
            database_strategy: strategy(&config.database_strategy, default_database_strategy)?,
            table_strategy: strategy(&config.table_strategy, default_table_strategy)?,
            actual_data_nodes,
            tables_by_data_source,
        })
    }

    pub fn actual_data_nodes(&self) -> &[DataNode] {
        &self.actual_data_nodes
    }

    pub fn data_sources(&self) -> Vec<String> {
        self.tables_by_data_source.keys().cloned().collect()
    }

    pub fn actual_tables(&self, data_source: &str) -> &[String] {
        self.tables_by_data_source
            .get(data_source)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_node(&self, data_source: &str, table: &str) -> bool {
        self.actual_tables(data_source).iter().any(|t| t == table)
    }

    /// Position of `table` among the actual tables of `data_source`
    pub fn actual_table_index(&self, data_source: &str, table: &str) -> Option<usize> {
        self.actual_tables(data_source)
            .iter()
            .position(|t| t.eq_ignore_ascii_case(table))
    }

    /// Every column either strategy shards on
    pub fn sharding_columns(&self) -> Vec<String> {
        let mut columns = self.database_strategy.columns();
        for column in self.table_strategy.columns() {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(&column)) {
                columns.push(column);
            }
        }
        columns
    }
}

/// Logical tables that always route to the same physical position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingTableGroup {
    pub tables: Vec<String>,
}

impl BindingTableGroup {
    pub fn contains(&self, logic_table: &str) -> bool {
        self.tables.iter().any(|t| t.eq_ignore_ascii_case(logic_table))
    }
}

/// Immutable rule snapshot
#[derive(Debug)]
pub struct ShardingRule {
    data_sources: Vec<String>,
    table_rules: IndexMap<String, TableRule>,
    binding_groups: Vec<BindingTableGroup>,
    broadcast_tables: Vec<String>,
    default_data_source: Option<String>,
    route_cache: RouteCache,
}

impl ShardingRule {
    pub fn new(
        data_sources: Vec<String>,
        config: &ShardingRuleConfig,
        cache: CacheConfig,
    ) -> Result<Self> {
        if data_sources.is_empty() {
            return Err(ShardError::ConfigurationError(
                "at least one data source must be declared".to_string(),
            ));
        }
        let algorithms = build_algorithms(&config.sharding_algorithms)?;
        let default_strategy = |configured: &Option<StrategyConfig>| match configured {
            Some(config) => ShardingStrategy::from_config(config, &algorithms),
            None => Ok(ShardingStrategy::None),
        };
        let default_database = default_strategy(&config.default_database_strategy)?;
        let default_table = default_strategy(&config.default_table_strategy)?;

        let mut table_rules = IndexMap::new();
        for table in &config.tables {
            let rule = TableRule::new(
                table,
                &data_sources,
                &default_database,
                &default_table,
                &algorithms,
            )?;
            let key = table.logic_table.to_ascii_lowercase();
            if table_rules.insert(key, rule).is_some() {
                return Err(ShardError::ConfigurationError(format!(
                    "table `{}` is configured twice",
                    table.logic_table
                )));
            }
        }

        let broadcast_tables: Vec<String> = config
            .broadcast_tables
            .iter()
            .map(|t| t.trim().to_string())
            .collect();
        if let Some(table) = broadcast_tables
            .iter()
            .find(|t| table_rules.contains_key(&t.to_ascii_lowercase()))
        {
            return Err(ShardError::ConfigurationError(format!(
                "table `{}` cannot be both sharded and broadcast",
                table
            )));
        }

        if let Some(ds) = &config.default_data_source {
            if !data_sources.contains(ds) {
                return Err(ShardError::ConfigurationError(format!(
                    "default data source `{}` is not declared",
                    ds
                )));
            }
        }

        let mut binding_groups = Vec::with_capacity(config.binding_tables.len());
        for group in &config.binding_tables {
            let tables: Vec<String> = group
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            validate_binding_group(&tables, &table_rules)?;
            binding_groups.push(BindingTableGroup { tables });
        }

        tracing::debug!(
            tables = table_rules.len(),
            binding_groups = binding_groups.len(),
            broadcast_tables = broadcast_tables.len(),
            "Sharding rule loaded"
        );

        Ok(Self {
            data_sources,
            table_rules,
            binding_groups,
            broadcast_tables,
            default_data_source: config.default_data_source.clone(),
            route_cache: RouteCache::new(cache),
        })
    }

    pub fn data_sources(&self) -> &[String] {
        &self.data_sources
    }

    pub fn table_rule(&self, logic_table: &str) -> Option<&TableRule> {
        self.table_rules.get(&logic_table.to_ascii_lowercase())
    }

    pub fn table_rules(&self) -> impl Iterator<Item = &TableRule> {
        self.table_rules.values()
    }

    pub fn is_sharding_table(&self, logic_table: &str) -> bool {
        self.table_rule(logic_table).is_some()
    }

    pub fn is_broadcast_table(&self, logic_table: &str) -> bool {
        self.broadcast_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(logic_table))
    }

    pub fn default_data_source(&self) -> Option<&str> {
        self.default_data_source.as_deref()
    }

    pub fn binding_group(&self, logic_table: &str) -> Option<&BindingTableGroup> {
        self.binding_groups.iter().find(|g| g.contains(logic_table))
    }

    /// True when every table belongs to one binding group.
    pub fn is_all_binding(&self, logic_tables: &[String]) -> bool {
        match logic_tables.first().and_then(|t| self.binding_group(t)) {
            Some(group) => logic_tables.iter().all(|t| group.contains(t)),
            None => false,
        }
    }

    pub fn is_bound_pair(&self, a: &str, b: &str) -> bool {
        self.binding_group(a).map(|g| g.contains(b)).unwrap_or(false)
    }

    /// The actual table of `bound_logic` paired with `primary_actual` of
    /// `primary_logic` on `data_source`: the one at the same position.
    pub fn binding_actual_table(
        &self,
        data_source: &str,
        primary_logic: &str,
        primary_actual: &str,
        bound_logic: &str,
    ) -> Result<String> {
        let missing = || {
            ShardError::ConfigurationError(format!(
                "cannot bind `{}` to `{}` ({}) on data source `{}`",
                bound_logic, primary_logic, primary_actual, data_source
            ))
        };
        let primary = self.table_rule(primary_logic).ok_or_else(missing)?;
        let bound = self.table_rule(bound_logic).ok_or_else(missing)?;
        let index = primary
            .actual_table_index(data_source, primary_actual)
            .ok_or_else(missing)?;
        bound
            .actual_tables(data_source)
            .get(index)
            .cloned()
            .ok_or_else(missing)
    }

    pub fn route_cache(&self) -> &RouteCache {
        &self.route_cache
    }
}

fn validate_binding_group(tables: &[String], rules: &IndexMap<String, TableRule>) -> Result<()> {
    let mut first: Option<&TableRule> = None;
    for table in tables {
        let rule = rules.get(&table.to_ascii_lowercase()).ok_or_else(|| {
            ShardError::ConfigurationError(format!(
                "binding table `{}` has no sharding rule",
                table
            ))
        })?;
        match first {
            None => first = Some(rule),
            Some(first) => {
                let same_shape = first.data_sources() == rule.data_sources()
                    && first.data_sources().iter().all(|ds| {
                        first.actual_tables(ds).len() == rule.actual_tables(ds).len()
                    });
                if !same_shape {
                    return Err(ShardError::ConfigurationError(format!(
                        "binding tables `{}` and `{}` have different data node layouts",
                        first.logic_table, rule.logic_table
                    )));
                }
            }
        }
    }
    Ok(())
}
