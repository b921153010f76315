use parking_lot::RwLock;
use shard_route::ShardingRule;
use std::sync::Arc;

/// Holds the live rule snapshot.
///
/// Each statement clones the `Arc` once and routes against that snapshot
/// to completion; `swap` only affects statements that start afterwards.
#[derive(Debug)]
pub struct RuleSnapshotHolder {
    current: RwLock<Arc<ShardingRule>>,
}

impl RuleSnapshotHolder {
    pub fn new(rule: ShardingRule) -> Self {
        Self {
            current: RwLock::new(Arc::new(rule)),
        }
    }

    pub fn current(&self) -> Arc<ShardingRule> {
        Arc::clone(&self.current.read())
    }

    /// Install a new snapshot, returning the previous one.
    pub fn swap(&self, rule: ShardingRule) -> Arc<ShardingRule> {
        let previous = std::mem::replace(&mut *self.current.write(), Arc::new(rule));
        tracing::info!(
            tables = previous.table_rules().count(),
            "Sharding rule snapshot replaced"
        );
        previous
    }
}
