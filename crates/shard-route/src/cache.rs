//! Bounded cache of per-table routing results.
//!
//! Owned by a [`ShardingRule`](crate::rule::ShardingRule) snapshot and dropped
//! with it, so a rule swap never serves stale routes.

use crate::condition::{ColumnCondition, ShardingCondition};
use crate::rule::DataNode;
use ahash::RandomState;
use lru::LruCache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shard_core::Value;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Configuration for the route cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached routes
    pub max_entries: usize,
    /// Time-to-live for cached routes
    pub ttl: Duration,
    /// Whether caching is enabled
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            ttl: Duration::from_secs(300),
            enabled: true,
        }
    }
}

impl CacheConfig {
    /// Create a disabled cache configuration
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// A logic table and the precise sharding values routed for it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteCacheKey {
    logic_table: String,
    values: Vec<(String, Vec<Value>)>,
}

impl RouteCacheKey {
    /// `None` when the condition holds ranges, which are not cached.
    pub fn new(logic_table: &str, condition: &ShardingCondition) -> Option<Self> {
        if !condition.is_precise() {
            return None;
        }
        let values = condition
            .iter()
            .filter_map(|(column, column_condition)| match column_condition {
                ColumnCondition::Values(values) => Some((column.clone(), values.clone())),
                ColumnCondition::Range(_) => None,
            })
            .collect();
        Some(Self {
            logic_table: logic_table.to_ascii_lowercase(),
            values,
        })
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    nodes: Vec<DataNode>,
    created_at: Instant,
}

/// Hit/miss/eviction counters
#[derive(Debug, Default)]
pub struct RouteCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl RouteCacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

/// Thread-safe LRU of routing results
pub struct RouteCache {
    cache: RwLock<LruCache<RouteCacheKey, CacheEntry, RandomState>>,
    config: CacheConfig,
    stats: RouteCacheStats,
}

impl RouteCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: RwLock::new(LruCache::with_hasher(capacity, RandomState::new())),
            config,
            stats: RouteCacheStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn get(&self, key: &RouteCacheKey) -> Option<Vec<DataNode>> {
        if !self.config.enabled {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let mut cache = self.cache.write();
        let expired = match cache.get(key) {
            Some(entry) if entry.created_at.elapsed() <= self.config.ttl => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.nodes.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.pop(key);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: RouteCacheKey, nodes: Vec<DataNode>) {
        if !self.config.enabled {
            return;
        }
        let entry = CacheEntry {
            nodes,
            created_at: Instant::now(),
        };
        let mut cache = self.cache.write();
        let replacing = cache.contains(&key);
        if cache.push(key, entry).is_some() && !replacing {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.cache.write().clear();
    }

    pub fn stats(&self) -> &RouteCacheStats {
        &self.stats
    }
}

impl std::fmt::Debug for RouteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteCache")
            .field("config", &self.config)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(user_id: i64) -> ShardingCondition {
        let mut condition = ShardingCondition::new();
        condition.add("user_id", ColumnCondition::Values(vec![Value::Int64(user_id)]));
        condition
    }

    fn nodes(table: &str) -> Vec<DataNode> {
        vec![DataNode::new("ds_0", table)]
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = RouteCache::new(CacheConfig::default());
        let key = RouteCacheKey::new("t_order", &condition(1)).unwrap();
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), nodes("t_order_1"));
        assert_eq!(cache.get(&key), Some(nodes("t_order_1")));
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_key_ignores_table_case_but_not_values() {
        let a = RouteCacheKey::new("T_ORDER", &condition(1)).unwrap();
        let b = RouteCacheKey::new("t_order", &condition(1)).unwrap();
        let c = RouteCacheKey::new("t_order", &condition(2)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_holds_every_sharding_value() {
        let mut both = condition(1);
        both.add("order_id", ColumnCondition::Values(vec![Value::Int64(7)]));
        let a = RouteCacheKey::new("t_order", &both).unwrap();
        let b = RouteCacheKey::new("t_order", &condition(1)).unwrap();
        assert_ne!(a, b);

        let mut ranged = condition(1);
        ranged.add(
            "order_id",
            ColumnCondition::Range(crate::condition::ValueRange::all()),
        );
        assert!(RouteCacheKey::new("t_order", &ranged).is_none());
    }

    #[test]
    fn test_replacing_an_entry_is_not_an_eviction() {
        let cache = RouteCache::new(CacheConfig::default().with_max_entries(1));
        let key = RouteCacheKey::new("t", &condition(1)).unwrap();
        cache.put(key.clone(), nodes("a"));
        cache.put(key.clone(), nodes("b"));
        assert_eq!(cache.get(&key), Some(nodes("b")));
        assert_eq!(cache.stats().evictions(), 0);
    }

    #[test]
    fn test_eviction() {
        let cache = RouteCache::new(CacheConfig::default().with_max_entries(1));
        cache.put(RouteCacheKey::new("t", &condition(1)).unwrap(), nodes("a"));
        cache.put(RouteCacheKey::new("t", &condition(2)).unwrap(), nodes("b"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_ttl_expiration() {
        let cache = RouteCache::new(CacheConfig::default().with_ttl(Duration::ZERO));
        let key = RouteCacheKey::new("t", &condition(1)).unwrap();
        cache.put(key.clone(), nodes("a"));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().expirations(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_cache_always_misses() {
        let cache = RouteCache::new(CacheConfig::disabled());
        let key = RouteCacheKey::new("t", &condition(1)).unwrap();
        cache.put(key.clone(), nodes("a"));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }
}
