//! Routing engine: bound statement + rule snapshot -> [`RouteContext`].

use crate::condition::{ColumnCondition, ShardingCondition, ShardingConditions};
use crate::context::{RouteContext, RouteMapper, RouteType, RouteUnit};
use crate::hint::HintContext;
use crate::cache::RouteCacheKey;
use crate::rule::{DataNode, ShardingRule, TableRule};
use indexmap::{IndexMap, IndexSet};
use shard_core::{Result, ShardError, StatementContext, StatementKind, Value};

/// Routes statements against one rule snapshot. Pure and synchronous.
pub struct RoutingEngine<'a> {
    rule: &'a ShardingRule,
    hint: &'a HintContext,
}

/// Referenced tables split by how the rule covers them.
struct TableClasses {
    all: Vec<String>,
    sharding: Vec<String>,
    broadcast: Vec<String>,
    single: Vec<String>,
}

impl<'a> RoutingEngine<'a> {
    pub fn new(rule: &'a ShardingRule, hint: &'a HintContext) -> Self {
        Self { rule, hint }
    }

    pub fn route(&self, statement: &StatementContext, params: &[Value]) -> Result<RouteContext> {
        let tables = self.classify(statement)?;
        let context = if tables.all.is_empty() {
            self.route_without_tables(statement.kind)?
        } else {
            match statement.kind {
                StatementKind::Ddl => self.route_ddl(&tables)?,
                StatementKind::Dal => self.route_dal(&tables)?,
                _ => self.route_dml(statement, params, &tables)?,
            }
        };
        if context.is_empty() {
            return Err(ShardError::NoTargetsResolved(tables.all.join(", ")));
        }
        tracing::debug!(
            route_type = ?context.route_type,
            units = context.len(),
            tables = %tables.all.join(","),
            "Statement routed"
        );
        Ok(context)
    }

    fn classify(&self, statement: &StatementContext) -> Result<TableClasses> {
        let all = statement.table_names();
        let mut classes = TableClasses {
            all: all.clone(),
            sharding: Vec::new(),
            broadcast: Vec::new(),
            single: Vec::new(),
        };
        for table in all {
            if self.rule.is_sharding_table(&table) {
                classes.sharding.push(table);
            } else if self.rule.is_broadcast_table(&table) {
                classes.broadcast.push(table);
            } else if self.rule.default_data_source().is_some() {
                classes.single.push(table);
            } else {
                return Err(ShardError::UnknownTable(table));
            }
        }
        Ok(classes)
    }

    fn table_rule(&self, logic_table: &str) -> Result<&'a TableRule> {
        self.rule
            .table_rule(logic_table)
            .ok_or_else(|| ShardError::UnknownTable(logic_table.to_string()))
    }

    fn route_without_tables(&self, kind: StatementKind) -> Result<RouteContext> {
        if kind == StatementKind::Select {
            let unit = self.first_data_source_unit(&[])?;
            return Ok(RouteContext::new(RouteType::Unicast, vec![unit]));
        }
        Ok(self.database_broadcast(&[]))
    }

    fn route_ddl(&self, tables: &TableClasses) -> Result<RouteContext> {
        if tables.sharding.is_empty() {
            if tables.single.is_empty() {
                return Ok(self.database_broadcast(&tables.broadcast));
            }
            return self.default_data_source(&tables.all);
        }
        let units = if tables.sharding.len() == 1 || self.rule.is_all_binding(&tables.sharding) {
            self.route_sharding_tables(&tables.sharding, &ShardingConditions::default())?
        } else {
            self.route_cartesian_groups(None, &[], &tables.sharding)?
        };
        Ok(RouteContext::new(
            RouteType::TableBroadcast,
            with_broadcast(units, &tables.broadcast),
        ))
    }

    fn route_dal(&self, tables: &TableClasses) -> Result<RouteContext> {
        if tables.sharding.is_empty() {
            return Ok(self.database_broadcast(&tables.all));
        }
        let unit = self.unicast(&tables.sharding)?;
        Ok(RouteContext::new(
            RouteType::Unicast,
            with_broadcast(vec![unit], &tables.broadcast),
        ))
    }

    fn route_dml(
        &self,
        statement: &StatementContext,
        params: &[Value],
        tables: &TableClasses,
    ) -> Result<RouteContext> {
        if tables.sharding.is_empty() {
            if !tables.single.is_empty() {
                return self.default_data_source(&tables.all);
            }
            if statement.kind == StatementKind::Select {
                let unit = self.first_data_source_unit(&tables.broadcast)?;
                return Ok(RouteContext::new(RouteType::Unicast, vec![unit]));
            }
            return Ok(self.database_broadcast(&tables.broadcast));
        }
        if let Some(single) = tables.single.first() {
            return Err(ShardError::ConfigurationError(format!(
                "table `{}` has no sharding rule and cannot be combined with sharding table `{}`",
                single, tables.sharding[0]
            )));
        }
        if statement.kind == StatementKind::Insert && statement.insert.is_some() {
            return self.route_insert(statement, params, tables);
        }

        let primary = self.table_rule(&tables.sharding[0])?;
        let conditions = ShardingConditions::extract(
            statement,
            params,
            &tables.sharding,
            &primary.sharding_columns(),
        )?;
        if conditions.always_false {
            let unit = self.unicast(&tables.sharding)?;
            return Ok(RouteContext::new(
                RouteType::Unicast,
                with_broadcast(vec![unit], &tables.broadcast),
            ));
        }
        let (route_type, units) =
            if tables.sharding.len() == 1 || self.rule.is_all_binding(&tables.sharding) {
                let units = self.route_sharding_tables(&tables.sharding, &conditions)?;
                (RouteType::Standard, units)
            } else {
                (
                    RouteType::Cartesian,
                    self.route_cartesian(statement, params, &tables.sharding)?,
                )
            };
        Ok(RouteContext::new(
            route_type,
            with_broadcast(units, &tables.broadcast),
        ))
    }

    /// Route one sharding table plus the tables bound to it. `conditions`
    /// belong to the first table; the rest follow by binding position.
    fn route_sharding_tables(
        &self,
        logic_tables: &[String],
        conditions: &ShardingConditions,
    ) -> Result<Vec<RouteUnit>> {
        let primary = self.table_rule(&logic_tables[0])?;
        let nodes = self.route_table(primary, conditions)?;
        let mut units = Vec::with_capacity(nodes.len());
        for node in nodes {
            let mut mappers = vec![RouteMapper::new(primary.logic_table.clone(), node.table.clone())];
            for bound in &logic_tables[1..] {
                let actual = self.rule.binding_actual_table(
                    &node.data_source,
                    &primary.logic_table,
                    &node.table,
                    bound,
                )?;
                mappers.push(RouteMapper::new(bound.clone(), actual));
            }
            units.push(RouteUnit::new(node.data_source, mappers));
        }
        Ok(units)
    }

    fn route_cartesian(
        &self,
        statement: &StatementContext,
        params: &[Value],
        logic_tables: &[String],
    ) -> Result<Vec<RouteUnit>> {
        self.route_cartesian_groups(Some(statement), params, logic_tables)
    }

    /// Cartesian routing: tables bound to each other form one group; groups
    /// are routed independently and combined per shared data source.
    fn route_cartesian_groups(
        &self,
        statement: Option<&StatementContext>,
        params: &[Value],
        logic_tables: &[String],
    ) -> Result<Vec<RouteUnit>> {
        let mut groups: Vec<Vec<String>> = Vec::new();
        for table in logic_tables {
            match groups
                .iter_mut()
                .find(|group| self.rule.is_bound_pair(&group[0], table))
            {
                Some(group) => group.push(table.clone()),
                None => groups.push(vec![table.clone()]),
            }
        }

        let mut routed: Vec<IndexMap<String, Vec<Vec<RouteMapper>>>> = Vec::with_capacity(groups.len());
        for group in &groups {
            let primary = self.table_rule(&group[0])?;
            let conditions = match statement {
                Some(statement) => ShardingConditions::extract(
                    statement,
                    params,
                    group,
                    &primary.sharding_columns(),
                )?,
                None => ShardingConditions::default(),
            };
            let mut by_data_source: IndexMap<String, Vec<Vec<RouteMapper>>> = IndexMap::new();
            for unit in self.route_sharding_tables(group, &conditions)? {
                by_data_source
                    .entry(unit.data_source.actual_name.clone())
                    .or_default()
                    .push(unit.table_mappers);
            }
            routed.push(by_data_source);
        }

        let mut units = Vec::new();
        let Some((first, rest)) = routed.split_first() else {
            return Ok(units);
        };
        for (data_source, first_options) in first {
            let mut combinations: Vec<Vec<RouteMapper>> = first_options.clone();
            let mut shared = true;
            for other in rest {
                let Some(options) = other.get(data_source) else {
                    shared = false;
                    break;
                };
                combinations = combinations
                    .iter()
                    .flat_map(|prefix| {
                        options.iter().map(move |option| {
                            let mut combined = prefix.clone();
                            combined.extend(option.iter().cloned());
                            combined
                        })
                    })
                    .collect();
            }
            if shared {
                units.extend(
                    combinations
                        .into_iter()
                        .map(|mappers| RouteUnit::new(data_source.clone(), mappers)),
                );
            }
        }
        Ok(units)
    }

    fn route_insert(
        &self,
        statement: &StatementContext,
        params: &[Value],
        tables: &TableClasses,
    ) -> Result<RouteContext> {
        let table_rule = self.table_rule(&tables.sharding[0])?;
        let Some(insert) = &statement.insert else {
            return Err(ShardError::NoTargetsResolved(table_rule.logic_table.clone()));
        };
        let columns = table_rule.sharding_columns();
        let mut row_nodes = Vec::with_capacity(insert.rows.len());
        for (row_index, row) in insert.rows.iter().enumerate() {
            let mut condition = ShardingCondition::new();
            for column in &columns {
                let Some(position) = insert
                    .columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(column))
                else {
                    continue;
                };
                let value = row.values.get(position).ok_or_else(|| {
                    ShardError::ConfigurationError(format!(
                        "insert row {} has no value for column `{}`",
                        row_index + 1,
                        column
                    ))
                })?;
                condition.add(column, ColumnCondition::Values(vec![value.resolve(params)?]));
            }
            let mut nodes = self.route_condition(table_rule, &condition)?;
            match nodes.len() {
                0 => {
                    return Err(ShardError::NoTargetsResolved(format!(
                        "{} (insert row {})",
                        table_rule.logic_table,
                        row_index + 1
                    )))
                }
                1 => row_nodes.extend(nodes.pop()),
                n => {
                    return Err(ShardError::ConfigurationError(format!(
                        "insert row {} of `{}` routes to {} data nodes; each row must resolve to exactly one",
                        row_index + 1,
                        table_rule.logic_table,
                        n
                    )))
                }
            }
        }
        let units: Vec<RouteUnit> = row_nodes
            .iter()
            .map(|node| {
                RouteUnit::new(
                    node.data_source.clone(),
                    vec![RouteMapper::new(
                        table_rule.logic_table.clone(),
                        node.table.clone(),
                    )],
                )
            })
            .collect();
        Ok(
            RouteContext::new(RouteType::Standard, with_broadcast(units, &tables.broadcast))
                .with_insert_rows(row_nodes),
        )
    }

    /// Union of the nodes routed by every AND-group.
    fn route_table(&self, table_rule: &TableRule, conditions: &ShardingConditions) -> Result<Vec<DataNode>> {
        if conditions.groups.is_empty() {
            return self.route_condition(table_rule, &ShardingCondition::new());
        }
        let mut nodes = IndexSet::new();
        for condition in &conditions.groups {
            nodes.extend(self.route_condition(table_rule, condition)?);
        }
        Ok(nodes.into_iter().collect())
    }

    /// Nodes for one AND-group: database strategy first, then the table
    /// strategy inside each routed data source.
    fn route_condition(&self, table_rule: &TableRule, condition: &ShardingCondition) -> Result<Vec<DataNode>> {
        let logic_table = &table_rule.logic_table;
        let cache_key = if self.hint.is_empty() {
            RouteCacheKey::new(logic_table, condition)
        } else {
            None
        };
        if let Some(key) = &cache_key {
            if let Some(nodes) = self.rule.route_cache().get(key) {
                return Ok(nodes);
            }
        }

        let database_hint = self.hint.database_values(logic_table);
        let table_hint = self.hint.table_values(logic_table);
        let data_sources = table_rule.data_sources();
        let routed_data_sources =
            table_rule
                .database_strategy
                .do_sharding(&data_sources, condition, database_hint)?;
        let mut nodes = Vec::new();
        for data_source in routed_data_sources {
            let actual_tables = table_rule.actual_tables(&data_source);
            let routed_tables = if self.hint.is_database_only() {
                actual_tables.to_vec()
            } else {
                table_rule
                    .table_strategy
                    .do_sharding(actual_tables, condition, table_hint)?
            };
            for table in routed_tables {
                if table_rule.contains_node(&data_source, &table) {
                    nodes.push(DataNode::new(data_source.clone(), table));
                }
            }
        }

        if let Some(key) = cache_key {
            self.rule.route_cache().put(key, nodes.clone());
        }
        Ok(nodes)
    }

    /// One unit on the first data source every table lives on.
    fn unicast(&self, sharding_tables: &[String]) -> Result<RouteUnit> {
        let primary = self.table_rule(&sharding_tables[0])?;
        let data_source = primary
            .data_sources()
            .into_iter()
            .find(|ds| {
                sharding_tables.iter().all(|t| {
                    self.rule
                        .table_rule(t)
                        .map(|r| !r.actual_tables(ds).is_empty())
                        .unwrap_or(false)
                })
            })
            .ok_or_else(|| ShardError::NoTargetsResolved(sharding_tables.join(", ")))?;
        let mut mappers = Vec::with_capacity(sharding_tables.len());
        for table in sharding_tables {
            let rule = self.table_rule(table)?;
            let actual = rule
                .actual_tables(&data_source)
                .first()
                .cloned()
                .ok_or_else(|| ShardError::NoTargetsResolved(table.clone()))?;
            mappers.push(RouteMapper::new(rule.logic_table.clone(), actual));
        }
        Ok(RouteUnit::new(data_source, mappers))
    }

    fn first_data_source_unit(&self, tables: &[String]) -> Result<RouteUnit> {
        let data_source = self
            .rule
            .data_sources()
            .first()
            .ok_or_else(|| ShardError::NoTargetsResolved(tables.join(", ")))?;
        Ok(RouteUnit::new(data_source.clone(), identity_mappers(tables)))
    }

    fn database_broadcast(&self, tables: &[String]) -> RouteContext {
        RouteContext::new(
            RouteType::DatabaseBroadcast,
            self.rule
                .data_sources()
                .iter()
                .map(|ds| RouteUnit::new(ds.clone(), identity_mappers(tables))),
        )
    }

    fn default_data_source(&self, tables: &[String]) -> Result<RouteContext> {
        let data_source = self
            .rule
            .default_data_source()
            .ok_or_else(|| ShardError::UnknownTable(tables.join(", ")))?;
        Ok(RouteContext::new(
            RouteType::DefaultDataSource,
            vec![RouteUnit::new(data_source, identity_mappers(tables))],
        ))
    }
}

fn identity_mappers(tables: &[String]) -> Vec<RouteMapper> {
    tables
        .iter()
        .map(|t| RouteMapper::new(t.clone(), t.clone()))
        .collect()
}

/// Broadcast tables exist on every data source under their logical name.
fn with_broadcast(mut units: Vec<RouteUnit>, broadcast: &[String]) -> Vec<RouteUnit> {
    if !broadcast.is_empty() {
        for unit in &mut units {
            unit.table_mappers.extend(identity_mappers(broadcast));
        }
    }
    units
}
