//! The statement pipeline: route, rewrite, execute, merge.

use crate::config::KernelConfig;
use crate::snapshot::RuleSnapshotHolder;
use shard_core::{Result, SelectContext, StatementContext, Value};
use shard_executor::{
    ConnectionProvider, ExecutionCoordinator, ExecutionMode, ExecutionResult,
    ExecutionStatsSnapshot, StatementId,
};
use shard_merge::{MergeEngine, MergedResult};
use shard_rewrite::{ExecutionUnit, RewriteContext, RewriteEngine};
use shard_route::{HintContext, RoutingEngine};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one logical statement
pub enum ExecuteResult {
    /// Merged rows with single-database semantics
    Query(Box<dyn MergedResult>),
    /// Update count summed over every unit
    Update { affected: u64 },
}

impl fmt::Debug for ExecuteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteResult::Query(result) => {
                write!(f, "Query({} columns)", result.column_count())
            }
            ExecuteResult::Update { affected } => write!(f, "Update {{ affected: {} }}", affected),
        }
    }
}

impl ExecuteResult {
    pub fn into_merged(self) -> Option<Box<dyn MergedResult>> {
        match self {
            ExecuteResult::Query(result) => Some(result),
            ExecuteResult::Update { .. } => None,
        }
    }

    pub fn affected_rows(&self) -> Option<u64> {
        match self {
            ExecuteResult::Update { affected } => Some(*affected),
            ExecuteResult::Query(_) => None,
        }
    }
}

/// Plans, executes and merges logical statements against the shards
pub struct ShardingKernel {
    rules: RuleSnapshotHolder,
    rewriter: RewriteEngine,
    coordinator: ExecutionCoordinator,
    merger: MergeEngine,
}

impl ShardingKernel {
    pub fn new(config: &KernelConfig, provider: Arc<dyn ConnectionProvider>) -> Result<Self> {
        let rule = config.build_rule()?;
        tracing::info!(
            data_sources = config.data_sources.len(),
            tables = config.rule.tables.len(),
            "Sharding kernel started"
        );
        Ok(Self {
            rules: RuleSnapshotHolder::new(rule),
            rewriter: RewriteEngine::new(),
            coordinator: ExecutionCoordinator::with_config(provider, config.executor.clone()),
            merger: MergeEngine::new(),
        })
    }

    /// Replace the token generator list.
    pub fn with_rewrite_engine(mut self, rewriter: RewriteEngine) -> Self {
        self.rewriter = rewriter;
        self
    }

    pub fn rules(&self) -> &RuleSnapshotHolder {
        &self.rules
    }

    /// Validate a new rule configuration and swap it in for later statements.
    pub fn reload(&self, config: &KernelConfig) -> Result<()> {
        let rule = config.build_rule()?;
        self.rules.swap(rule);
        Ok(())
    }

    pub fn stats(&self) -> ExecutionStatsSnapshot {
        self.coordinator.stats()
    }

    pub fn in_flight(&self) -> Vec<StatementId> {
        self.coordinator.in_flight()
    }

    /// Abort every unit of an in-flight statement.
    pub fn cancel(&self, id: StatementId) -> bool {
        self.coordinator.cancel(id)
    }

    /// Route and rewrite without executing anything.
    pub fn preview(
        &self,
        sql: &str,
        statement: &StatementContext,
        params: &[Value],
        hint: &HintContext,
    ) -> Result<Vec<ExecutionUnit>> {
        self.plan(sql, statement, params, hint)
            .map(|(units, _)| units)
    }

    pub async fn execute(
        &self,
        sql: &str,
        statement: &StatementContext,
        params: &[Value],
    ) -> Result<ExecuteResult> {
        self.execute_with(StatementId::new(), sql, statement, params, &HintContext::new())
            .await
    }

    /// Execute under a caller-chosen id, so the caller can `cancel` it.
    pub async fn execute_with(
        &self,
        id: StatementId,
        sql: &str,
        statement: &StatementContext,
        params: &[Value],
        hint: &HintContext,
    ) -> Result<ExecuteResult> {
        let start_time = Instant::now();
        let (units, select) = self.plan(sql, statement, params, hint)?;
        let mode = if statement.kind.is_query() {
            ExecutionMode::Query
        } else {
            ExecutionMode::Update
        };

        let result = match self.coordinator.execute(id, mode, units).await? {
            ExecutionResult::Query(results) => {
                ExecuteResult::Query(self.merger.merge(results, select.as_ref())?)
            }
            ExecutionResult::Update { affected } => ExecuteResult::Update { affected },
        };
        tracing::debug!(
            statement = %id,
            kind = ?statement.kind,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Statement completed"
        );
        Ok(result)
    }

    /// Route against the current snapshot and rewrite for every unit.
    fn plan(
        &self,
        sql: &str,
        statement: &StatementContext,
        params: &[Value],
        hint: &HintContext,
    ) -> Result<(Vec<ExecutionUnit>, Option<SelectContext>)> {
        let rule = self.rules.current();
        let route = RoutingEngine::new(&rule, hint).route(statement, params)?;
        let context = RewriteContext::new(sql, statement, params, &route)?;
        let units = self.rewriter.rewrite(&context)?;
        Ok((units, context.into_select()))
    }
}
