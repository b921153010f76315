//! Routing results

use crate::rule::DataNode;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical name to actual name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteMapper {
    pub logic_name: String,
    pub actual_name: String,
}

impl RouteMapper {
    pub fn new(logic_name: impl Into<String>, actual_name: impl Into<String>) -> Self {
        Self {
            logic_name: logic_name.into(),
            actual_name: actual_name.into(),
        }
    }
}

/// One physical execution target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteUnit {
    pub data_source: RouteMapper,
    pub table_mappers: Vec<RouteMapper>,
}

impl RouteUnit {
    pub fn new(data_source: impl Into<String>, table_mappers: Vec<RouteMapper>) -> Self {
        let data_source = data_source.into();
        Self {
            data_source: RouteMapper::new(data_source.clone(), data_source),
            table_mappers,
        }
    }

    pub fn data_source_name(&self) -> &str {
        &self.data_source.actual_name
    }

    /// Actual table for a logical table, case-insensitively
    pub fn actual_table(&self, logic_table: &str) -> Option<&str> {
        self.table_mappers
            .iter()
            .find(|m| m.logic_name.eq_ignore_ascii_case(logic_table))
            .map(|m| m.actual_name.as_str())
    }

    pub fn actual_tables(&self) -> Vec<String> {
        self.table_mappers
            .iter()
            .map(|m| m.actual_name.clone())
            .collect()
    }

    pub fn contains_node(&self, node: &DataNode) -> bool {
        self.data_source_name() == node.data_source
            && self
                .table_mappers
                .iter()
                .any(|m| m.actual_name == node.table)
    }
}

impl fmt::Display for RouteUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.data_source.actual_name)?;
        if !self.table_mappers.is_empty() {
            write!(f, "[{}]", self.actual_tables().join(", "))?;
        }
        Ok(())
    }
}

/// Which routing path produced a [`RouteContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteType {
    /// One sharding table, or only tables bound to each other
    Standard,
    /// Several unbound sharding tables
    Cartesian,
    /// Exactly one arbitrary target
    Unicast,
    /// Every data source
    DatabaseBroadcast,
    /// Every actual node of the referenced tables
    TableBroadcast,
    /// Tables no rule covers, sent to the default data source
    DefaultDataSource,
}

/// Ordered, duplicate-free set of route units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteContext {
    pub route_type: RouteType,
    units: Vec<RouteUnit>,
    /// For INSERT ... VALUES: the node each value row routes to.
    insert_row_nodes: Option<Vec<DataNode>>,
}

impl RouteContext {
    pub fn new(route_type: RouteType, units: impl IntoIterator<Item = RouteUnit>) -> Self {
        let units: IndexSet<RouteUnit> = units.into_iter().collect();
        Self {
            route_type,
            units: units.into_iter().collect(),
            insert_row_nodes: None,
        }
    }

    pub fn with_insert_rows(mut self, row_nodes: Vec<DataNode>) -> Self {
        self.insert_row_nodes = Some(row_nodes);
        self
    }

    pub fn units(&self) -> &[RouteUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn is_single_unit(&self) -> bool {
        self.units.len() == 1
    }

    /// Distinct data sources in unit order
    pub fn data_sources(&self) -> Vec<String> {
        let names: IndexSet<&str> = self.units.iter().map(|u| u.data_source_name()).collect();
        names.into_iter().map(str::to_string).collect()
    }

    pub fn insert_row_nodes(&self) -> Option<&[DataNode]> {
        self.insert_row_nodes.as_deref()
    }

    /// Indexes of the insert rows that belong to `unit`, or `None` when the
    /// statement is not a routed INSERT ... VALUES.
    pub fn insert_rows_for(&self, unit: &RouteUnit) -> Option<Vec<usize>> {
        self.insert_row_nodes.as_ref().map(|nodes| {
            nodes
                .iter()
                .enumerate()
                .filter(|(_, node)| unit.contains_node(node))
                .map(|(i, _)| i)
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(ds: &str, table: &str) -> RouteUnit {
        RouteUnit::new(ds, vec![RouteMapper::new("t_order", table)])
    }

    #[test]
    fn test_units_are_deduplicated_in_order() {
        let context = RouteContext::new(
            RouteType::Standard,
            vec![
                unit("ds_1", "t_order_1"),
                unit("ds_0", "t_order_0"),
                unit("ds_1", "t_order_1"),
            ],
        );
        assert_eq!(context.len(), 2);
        assert_eq!(context.units()[0].to_string(), "ds_1[t_order_1]");
        assert_eq!(context.data_sources(), vec!["ds_1", "ds_0"]);
    }

    #[test]
    fn test_insert_rows_for_unit() {
        let context = RouteContext::new(
            RouteType::Standard,
            vec![unit("ds_0", "t_order_1"), unit("ds_0", "t_order_2")],
        )
        .with_insert_rows(vec![
            DataNode::new("ds_0", "t_order_1"),
            DataNode::new("ds_0", "t_order_2"),
            DataNode::new("ds_0", "t_order_1"),
        ]);
        assert_eq!(context.insert_rows_for(&context.units()[0]), Some(vec![0, 2]));
        assert_eq!(context.insert_rows_for(&context.units()[1]), Some(vec![1]));
        assert_eq!(context.units()[0].actual_table("T_ORDER"), Some("t_order_1"));
    }
}
