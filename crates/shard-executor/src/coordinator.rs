//! Execution coordinator
//!
//! Runs the rewritten statement of every route unit on its own physical
//! connection. One unit runs inline on the caller's task; several fan out
//! onto a [`JoinSet`] bounded by a semaphore.

use crate::config::{ExecutorConfig, FailurePolicy};
use crate::connection::ConnectionProvider;
use crate::stats::{ExecutionStats, ExecutionStatsSnapshot};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shard_core::{QueryResult, Result, ShardError, UnitFailure};
use shard_rewrite::ExecutionUnit;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

/// Unique identifier for one statement execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatementId(pub Uuid);

impl StatementId {
    /// Create a new random statement ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StatementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stmt-{}", &self.0.to_string()[..8])
    }
}

/// Whether units produce rows or update counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Query,
    Update,
}

enum UnitOutcome {
    Rows(Box<dyn QueryResult>),
    Affected(u64),
}

/// Result of one statement across all its units
pub enum ExecutionResult {
    /// One cursor per unit, in route order
    Query(Vec<Box<dyn QueryResult>>),
    /// Update counts summed over all units
    Update { affected: u64 },
}

impl fmt::Debug for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionResult::Query(results) => write!(f, "Query({} results)", results.len()),
            ExecutionResult::Update { affected } => write!(f, "Update {{ affected: {} }}", affected),
        }
    }
}

impl ExecutionResult {
    pub fn into_query_results(self) -> Result<Vec<Box<dyn QueryResult>>> {
        match self {
            ExecutionResult::Query(results) => Ok(results),
            ExecutionResult::Update { .. } => Err(ShardError::TypeMismatch {
                expected: "query results".to_string(),
                found: "update count".to_string(),
            }),
        }
    }

    pub fn affected_rows(&self) -> Option<u64> {
        match self {
            ExecutionResult::Update { affected } => Some(*affected),
            ExecutionResult::Query(_) => None,
        }
    }
}

/// Removes a statement from the in-flight registry however execution ends.
struct InFlightGuard<'a> {
    registry: &'a DashMap<StatementId, watch::Sender<bool>>,
    id: StatementId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

/// Executes rewritten units concurrently against physical data sources
pub struct ExecutionCoordinator {
    provider: Arc<dyn ConnectionProvider>,
    config: ExecutorConfig,
    in_flight: DashMap<StatementId, watch::Sender<bool>>,
    stats: ExecutionStats,
}

impl ExecutionCoordinator {
    /// Create a new coordinator with default configuration
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self::with_config(provider, ExecutorConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(provider: Arc<dyn ConnectionProvider>, config: ExecutorConfig) -> Self {
        Self {
            provider,
            config,
            in_flight: DashMap::new(),
            stats: ExecutionStats::default(),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn stats(&self) -> ExecutionStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn in_flight(&self) -> Vec<StatementId> {
        self.in_flight.iter().map(|e| *e.key()).collect()
    }

    /// Abandon a running statement. Every unit task is aborted and its
    /// connection dropped. Returns false when the statement is not running.
    pub fn cancel(&self, id: StatementId) -> bool {
        match self.in_flight.get(&id) {
            Some(sender) => {
                sender.send_replace(true);
                tracing::info!(statement = %id, "Statement cancelled");
                true
            }
            None => false,
        }
    }

    pub async fn execute(
        &self,
        id: StatementId,
        mode: ExecutionMode,
        units: Vec<ExecutionUnit>,
    ) -> Result<ExecutionResult> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.in_flight.insert(id, cancel_tx);
        let _guard = InFlightGuard {
            registry: &self.in_flight,
            id,
        };
        self.stats.record_statement(units.len());

        let start_time = Instant::now();
        let unit_count = units.len();
        let outcome = match units.len() {
            0 => Ok(Vec::new()),
            1 => self.execute_inline(units, mode, cancel_rx).await,
            _ => self.execute_parallel(id, units, mode, cancel_rx).await,
        };
        let elapsed = start_time.elapsed();

        match outcome {
            Ok(outcomes) => {
                tracing::debug!(
                    statement = %id,
                    units = unit_count,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Statement executed"
                );
                Ok(collect(mode, outcomes))
            }
            Err(e) => {
                match e {
                    ShardError::Cancelled => self.stats.record_cancellation(),
                    _ => self.stats.record_failure(),
                }
                tracing::debug!(statement = %id, error = %e, "Statement failed");
                Err(e)
            }
        }
    }

    async fn execute_inline(
        &self,
        units: Vec<ExecutionUnit>,
        mode: ExecutionMode,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<Vec<UnitOutcome>> {
        let mut outcomes = Vec::with_capacity(1);
        for unit in units {
            let failure_target = (unit.data_source().to_string(), unit.route_unit.actual_tables());
            let run = run_unit(
                Arc::clone(&self.provider),
                unit,
                mode,
                self.config.unit_timeout(),
            );
            let result = tokio::select! {
                result = run => result,
                _ = wait_cancelled(cancel_rx.clone()) => Err(ShardError::Cancelled),
            };
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => return Err(self.fail(vec![unit_failure(failure_target, e)])),
            }
        }
        Ok(outcomes)
    }

    async fn execute_parallel(
        &self,
        id: StatementId,
        units: Vec<ExecutionUnit>,
        mode: ExecutionMode,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<Vec<UnitOutcome>> {
        let permits = self.config.permits();
        tracing::debug!(
            statement = %id,
            units = units.len(),
            max_parallelism = permits,
            "Fanning out statement"
        );
        let semaphore = Arc::new(Semaphore::new(permits));
        let timeout = self.config.unit_timeout();
        let mut targets = Vec::with_capacity(units.len());
        let mut tasks = JoinSet::new();
        for (index, unit) in units.into_iter().enumerate() {
            targets.push((unit.data_source().to_string(), unit.route_unit.actual_tables()));
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, run_unit(provider, unit, mode, timeout).await)
            });
        }

        let mut slots: Vec<Option<UnitOutcome>> = (0..targets.len()).map(|_| None).collect();
        let mut failures = Vec::new();
        let mut cancelled = std::pin::pin!(wait_cancelled(cancel_rx));
        loop {
            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = &mut cancelled => {
                    tasks.abort_all();
                    return Err(ShardError::Cancelled);
                }
            };
            let Some(joined) = joined else {
                break;
            };
            let (index, result) = match joined {
                Ok(pair) => pair,
                Err(join_error) => {
                    let error = ShardError::Connection(format!("unit task failed: {}", join_error));
                    failures.push((
                        UnitFailure::new("<unknown>", Vec::new(), error.to_string()),
                        error,
                    ));
                    if self.config.failure_policy == FailurePolicy::FailFast {
                        tasks.abort_all();
                        return Err(self.fail(failures));
                    }
                    continue;
                }
            };
            match result {
                Ok(outcome) => slots[index] = Some(outcome),
                Err(e) => {
                    let target = targets[index].clone();
                    failures.push(unit_failure(target, e));
                    if self.config.failure_policy == FailurePolicy::FailFast {
                        // Remaining tasks are aborted and their partial results discarded.
                        tasks.abort_all();
                        return Err(self.fail(failures));
                    }
                }
            }
        }

        if !failures.is_empty() {
            return Err(self.fail(failures));
        }
        Ok(slots.into_iter().flatten().collect())
    }

    /// Fail-fast keeps timeouts and cancellation as their own kinds; anything
    /// else becomes an aggregated failure naming the physical targets.
    fn fail(&self, mut failures: Vec<(UnitFailure, ShardError)>) -> ShardError {
        for (failure, _) in &failures {
            tracing::warn!(
                data_source = %failure.data_source,
                tables = %failure.actual_tables.join(","),
                "Unit failed: {}",
                failure.message
            );
        }
        if failures.len() == 1 && self.config.failure_policy == FailurePolicy::FailFast {
            if let Some((failure, error)) = failures.pop() {
                return match error {
                    ShardError::ExecutionTimeout { .. } | ShardError::Cancelled => error,
                    _ => ShardError::ExecutionFailure(vec![failure]),
                };
            }
        }
        ShardError::ExecutionFailure(failures.into_iter().map(|(failure, _)| failure).collect())
    }
}

fn unit_failure(
    (data_source, actual_tables): (String, Vec<String>),
    error: ShardError,
) -> (UnitFailure, ShardError) {
    (
        UnitFailure::new(data_source, actual_tables, error.to_string()),
        error,
    )
}

async fn run_unit(
    provider: Arc<dyn ConnectionProvider>,
    unit: ExecutionUnit,
    mode: ExecutionMode,
    timeout: Option<Duration>,
) -> Result<UnitOutcome> {
    let data_source = unit.data_source().to_string();
    let work = async {
        let mut connection = provider.acquire(&data_source).await?;
        let sql = &unit.sql_unit.sql;
        let params = &unit.sql_unit.parameters;
        let outcome = match mode {
            ExecutionMode::Query => connection.query(sql, params).await.map(UnitOutcome::Rows),
            ExecutionMode::Update => connection.update(sql, params).await.map(UnitOutcome::Affected),
        };
        let closed = connection.close().await;
        match (outcome, closed) {
            (Ok(outcome), closed) => closed.map(|_| outcome),
            (Err(error), closed) => {
                if let Err(close_error) = closed {
                    tracing::debug!(data_source = %data_source, "Close after failure: {}", close_error);
                }
                Err(error)
            }
        }
    };
    match timeout {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .map_err(|_| ShardError::ExecutionTimeout {
                data_source,
                timeout_ms: limit.as_millis() as u64,
            })?,
        None => work.await,
    }
}

/// Resolves once the statement is cancelled; never if the sender goes away.
async fn wait_cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

fn collect(mode: ExecutionMode, outcomes: Vec<UnitOutcome>) -> ExecutionResult {
    match mode {
        ExecutionMode::Query => ExecutionResult::Query(
            outcomes
                .into_iter()
                .filter_map(|o| match o {
                    UnitOutcome::Rows(rows) => Some(rows),
                    UnitOutcome::Affected(_) => None,
                })
                .collect(),
        ),
        ExecutionMode::Update => ExecutionResult::Update {
            affected: outcomes
                .iter()
                .map(|o| match o {
                    UnitOutcome::Affected(n) => *n,
                    UnitOutcome::Rows(_) => 0,
                })
                .sum(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedConnectionProvider, ScriptedResponse};
    use shard_core::{ColumnMetadata, DataType, MemoryQueryResult, Value};
    use shard_rewrite::SqlUnit;
    use shard_route::{RouteMapper, RouteUnit};

    fn unit(ds: &str, table: &str, sql: &str) -> ExecutionUnit {
        ExecutionUnit {
            route_unit: RouteUnit::new(ds, vec![RouteMapper::new("t_order", table)]),
            sql_unit: SqlUnit {
                sql: sql.to_string(),
                parameters: Vec::new(),
            },
        }
    }

    fn rows(ids: &[i64]) -> ScriptedResponse {
        ScriptedResponse::Rows(MemoryQueryResult::new(
            vec![ColumnMetadata::new("id", DataType::Int64, false)],
            ids.iter().map(|id| vec![Value::Int64(*id)]).collect(),
        ))
    }

    fn coordinator(provider: &ScriptedConnectionProvider, config: ExecutorConfig) -> ExecutionCoordinator {
        ExecutionCoordinator::with_config(Arc::new(provider.clone()), config)
    }

    #[tokio::test]
    async fn test_query_results_keep_route_order() {
        let provider = ScriptedConnectionProvider::new()
            .with_response("ds_0", "t_order_0", rows(&[1, 2]))
            .with_response("ds_1", "t_order_1", rows(&[3]));
        let coordinator = coordinator(&provider, ExecutorConfig::default());
        let result = coordinator
            .execute(
                StatementId::new(),
                ExecutionMode::Query,
                vec![
                    unit("ds_0", "t_order_0", "SELECT id FROM t_order_0"),
                    unit("ds_1", "t_order_1", "SELECT id FROM t_order_1"),
                ],
            )
            .await
            .unwrap();
        let mut results = result.into_query_results().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[1].next().unwrap());
        assert_eq!(results[1].value(0).unwrap(), Value::Int64(3));
        assert_eq!(provider.closed_count(), 2);
        assert!(coordinator.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_update_counts_are_summed() {
        let provider = ScriptedConnectionProvider::new()
            .with_response("ds_0", "UPDATE", ScriptedResponse::Affected(2))
            .with_response("ds_1", "UPDATE", ScriptedResponse::Affected(5));
        let coordinator = coordinator(&provider, ExecutorConfig::default());
        let result = coordinator
            .execute(
                StatementId::new(),
                ExecutionMode::Update,
                vec![
                    unit("ds_0", "t_order_0", "UPDATE t_order_0 SET v = 1"),
                    unit("ds_1", "t_order_1", "UPDATE t_order_1 SET v = 1"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(result.affected_rows(), Some(7));
        assert_eq!(coordinator.stats().units, 2);
    }

    #[tokio::test]
    async fn test_fail_fast_reports_failing_unit() {
        let provider = ScriptedConnectionProvider::new()
            .with_response("ds_0", "t_order_0", rows(&[1]))
            .with_response("ds_1", "t_order_1", ScriptedResponse::Fail("connection reset".into()));
        let coordinator = coordinator(&provider, ExecutorConfig::default());
        let err = coordinator
            .execute(
                StatementId::new(),
                ExecutionMode::Query,
                vec![
                    unit("ds_0", "t_order_0", "SELECT id FROM t_order_0"),
                    unit("ds_1", "t_order_1", "SELECT id FROM t_order_1"),
                ],
            )
            .await
            .unwrap_err();
        match err {
            ShardError::ExecutionFailure(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].data_source, "ds_1");
                assert_eq!(failures[0].actual_tables, vec!["t_order_1"]);
                assert!(failures[0].message.contains("connection reset"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(coordinator.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_collect_all_reports_every_failure() {
        let provider = ScriptedConnectionProvider::new()
            .with_response("ds_0", "t", ScriptedResponse::Fail("down".into()))
            .with_response("ds_1", "t", ScriptedResponse::Fail("down".into()));
        let coordinator = coordinator(
            &provider,
            ExecutorConfig::default().with_failure_policy(FailurePolicy::CollectAll),
        );
        let err = coordinator
            .execute(
                StatementId::new(),
                ExecutionMode::Update,
                vec![
                    unit("ds_0", "t_order_0", "DELETE FROM t_order_0"),
                    unit("ds_1", "t_order_1", "DELETE FROM t_order_1"),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ShardError::ExecutionFailure(ref f) if f.len() == 2));
        assert_eq!(provider.closed_count(), 2);
    }

    #[tokio::test]
    async fn test_unit_timeout() {
        let provider = ScriptedConnectionProvider::new()
            .with_response("ds_0", "t_order_0", rows(&[1]))
            .with_delay(Duration::from_millis(200));
        let coordinator = coordinator(&provider, ExecutorConfig::default().with_unit_timeout_ms(10));
        let err = coordinator
            .execute(
                StatementId::new(),
                ExecutionMode::Query,
                vec![unit("ds_0", "t_order_0", "SELECT id FROM t_order_0")],
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ShardError::ExecutionTimeout {
                data_source: "ds_0".to_string(),
                timeout_ms: 10
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_aborts_all_units() {
        let provider = ScriptedConnectionProvider::new()
            .with_response("ds_0", "t_order", rows(&[1]))
            .with_response("ds_1", "t_order", rows(&[2]))
            .with_delay(Duration::from_secs(5));
        let coordinator = Arc::new(coordinator(&provider, ExecutorConfig::default().with_unit_timeout_ms(0)));
        let id = StatementId::new();
        let running = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .execute(
                        id,
                        ExecutionMode::Query,
                        vec![
                            unit("ds_0", "t_order_0", "SELECT id FROM t_order_0"),
                            unit("ds_1", "t_order_1", "SELECT id FROM t_order_1"),
                        ],
                    )
                    .await
            })
        };
        while !coordinator.in_flight().contains(&id) {
            tokio::task::yield_now().await;
        }
        assert!(coordinator.cancel(id));
        let err = running.await.unwrap().unwrap_err();
        assert_eq!(err, ShardError::Cancelled);
        assert_eq!(provider.closed_count(), 0);
        assert_eq!(coordinator.stats().cancellations, 1);
        assert!(!coordinator.cancel(id));
    }

    #[test]
    fn test_statement_id_display() {
        let id = StatementId::new();
        assert!(id.to_string().starts_with("stmt-"));
        assert_eq!(id.to_string().len(), 13);
    }
}
