//! Sharding rules and routing.
//!
//! A [`ShardingRule`] is built once from a [`ShardingRuleConfig`] and shared
//! read-only; [`RoutingEngine`] maps a bound statement onto the data nodes
//! it must run on.

pub mod algorithm;
pub mod cache;
pub mod condition;
pub mod config;
pub mod context;
pub mod engine;
pub mod expression;
pub mod hint;
pub mod rule;
pub mod strategy;

pub use algorithm::{create_algorithm, ShardingAlgorithm, ShardingInput};
pub use cache::{CacheConfig, RouteCache, RouteCacheKey, RouteCacheStats};
pub use condition::{ColumnCondition, ShardingCondition, ShardingConditions, ValueRange};
pub use config::{AlgorithmConfig, ShardingRuleConfig, StrategyConfig, TableRuleConfig};
pub use context::{RouteContext, RouteMapper, RouteType, RouteUnit};
pub use engine::RoutingEngine;
pub use hint::HintContext;
pub use rule::{BindingTableGroup, DataNode, ShardingRule, TableRule};
pub use strategy::ShardingStrategy;
