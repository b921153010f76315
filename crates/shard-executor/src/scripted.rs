//! In-memory connection provider that answers from a script.
//!
//! Used by tests and demos to drive the pipeline without real databases.
//! Every statement is recorded so callers can assert on the SQL each data
//! source received.

use crate::connection::{ConnectionProvider, PhysicalConnection};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shard_core::{MemoryQueryResult, QueryResult, Result, ShardError, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Rows(MemoryQueryResult),
    Affected(u64),
    Fail(String),
}

/// One statement as received by a scripted connection
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub data_source: String,
    pub sql: String,
    pub parameters: Vec<Value>,
}

#[derive(Debug)]
struct Script {
    data_source: String,
    fragment: String,
    response: ScriptedResponse,
}

#[derive(Debug, Default)]
struct ScriptState {
    scripts: RwLock<Vec<Script>>,
    executed: Mutex<Vec<ExecutedStatement>>,
    delay: RwLock<Option<Duration>>,
    acquired: AtomicUsize,
    closed: AtomicUsize,
}

impl ScriptState {
    fn respond(&self, data_source: &str, sql: &str, params: &[Value]) -> Result<ScriptedResponse> {
        self.executed.lock().push(ExecutedStatement {
            data_source: data_source.to_string(),
            sql: sql.to_string(),
            parameters: params.to_vec(),
        });
        self.scripts
            .read()
            .iter()
            .find(|s| s.data_source == data_source && sql.contains(&s.fragment))
            .map(|s| s.response.clone())
            .ok_or_else(|| {
                ShardError::Connection(format!(
                    "no scripted response on {} for `{}`",
                    data_source, sql
                ))
            })
    }
}

/// Scripted [`ConnectionProvider`]
#[derive(Debug, Clone, Default)]
pub struct ScriptedConnectionProvider {
    state: Arc<ScriptState>,
}

impl ScriptedConnectionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer statements on `data_source` whose SQL contains `fragment`.
    /// Earlier scripts win.
    pub fn with_response(
        self,
        data_source: impl Into<String>,
        fragment: impl Into<String>,
        response: ScriptedResponse,
    ) -> Self {
        self.state.scripts.write().push(Script {
            data_source: data_source.into(),
            fragment: fragment.into(),
            response,
        });
        self
    }

    /// Delay every statement, to exercise timeouts and cancellation.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.write() = Some(delay);
        self
    }

    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.state.executed.lock().clone()
    }

    pub fn acquired_count(&self) -> usize {
        self.state.acquired.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionProvider for ScriptedConnectionProvider {
    async fn acquire(&self, data_source: &str) -> Result<Box<dyn PhysicalConnection>> {
        self.state.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            data_source: data_source.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct ScriptedConnection {
    data_source: String,
    state: Arc<ScriptState>,
}

impl ScriptedConnection {
    async fn pause(&self) {
        let delay = *self.state.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PhysicalConnection for ScriptedConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn QueryResult>> {
        self.pause().await;
        match self.state.respond(&self.data_source, sql, params)? {
            ScriptedResponse::Rows(rows) => Ok(Box::new(rows)),
            ScriptedResponse::Fail(message) => Err(ShardError::Connection(message)),
            ScriptedResponse::Affected(_) => Err(ShardError::Connection(format!(
                "scripted statement on {} returns no rows",
                self.data_source
            ))),
        }
    }

    async fn update(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.pause().await;
        match self.state.respond(&self.data_source, sql, params)? {
            ScriptedResponse::Affected(count) => Ok(count),
            ScriptedResponse::Fail(message) => Err(ShardError::Connection(message)),
            ScriptedResponse::Rows(_) => Err(ShardError::Connection(format!(
                "scripted statement on {} returns rows",
                self.data_source
            ))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
