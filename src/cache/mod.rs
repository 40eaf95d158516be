//! Read-through aggregation cache with TTL expiry and scope invalidation.
//!
//! Keyed by exact aggregation tuples (scope, scope id, statistic, window).
//! Invalidation is deliberately coarse: a ledger write for an agent clears
//! every cached window for that agent and for the agent's region, trading
//! recompute cost for correctness simplicity. Entries expire on a monotonic
//! clock; an expired entry is logically absent even while physically
//! retained, so a reader can never observe stale-beyond-TTL data.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::models::{AgentPerformance, RegionPerformance, Transaction};

/// Aggregation dimension a cached statistic is computed over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Agent,
    Region,
}

/// Which statistic the entry holds for its scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatKind {
    Performance,
    Transactions,
}

/// Identity of a cached aggregate. Two keys are equal iff every field
/// matches exactly; equivalent windows written differently are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationKey {
    pub scope: Scope,
    pub scope_id: String,
    pub stat: StatKind,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
}

impl AggregationKey {
    pub fn agent_performance(agent_id: &str) -> Self {
        Self {
            scope: Scope::Agent,
            scope_id: agent_id.to_string(),
            stat: StatKind::Performance,
            window_start: None,
            window_end: None,
        }
    }

    pub fn region_performance(region_id: &str) -> Self {
        Self {
            scope: Scope::Region,
            scope_id: region_id.to_string(),
            stat: StatKind::Performance,
            window_start: None,
            window_end: None,
        }
    }

    pub fn agent_transactions(
        agent_id: &str,
        window_start: Option<&str>,
        window_end: Option<&str>,
    ) -> Self {
        Self {
            scope: Scope::Agent,
            scope_id: agent_id.to_string(),
            stat: StatKind::Transactions,
            window_start: window_start.map(str::to_string),
            window_end: window_end.map(str::to_string),
        }
    }
}

/// Tagged aggregate payloads, one variant per statistic shape
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateValue {
    AgentPerformance(AgentPerformance),
    RegionPerformance(RegionPerformance),
    Transactions(Vec<Transaction>),
}

struct CacheEntry {
    value: AggregateValue,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    /// Servable iff now < inserted_at + ttl.
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

struct CacheInner {
    entries: HashMap<AggregationKey, CacheEntry>,
    /// scope_id -> keys currently held for that scope. A single write can
    /// invalidate multiple distinct windows for the same agent, so lookups
    /// must not scan the whole map.
    scope_index: HashMap<String, HashSet<AggregationKey>>,
}

/// Cache counters for observability
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub entries: usize,
}

pub struct AggregationCache {
    inner: RwLock<CacheInner>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl AggregationCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                entries: HashMap::new(),
                scope_index: HashMap::new(),
            }),
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Fetch a servable entry. Expired entries are treated identically to
    /// missing ones; removal is left to `purge_expired` or invalidation.
    pub fn get(&self, key: &AggregationKey) -> Option<AggregateValue> {
        let now = Instant::now();
        let inner = self.inner.read();

        match inner.entries.get(key) {
            Some(entry) if entry.is_fresh(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or unconditionally overwrite. Concurrent put races for the same
    /// key are resolved last-write-wins; racing recomputations of the same
    /// key against the same data produce equal values, so the wasted work is
    /// harmless.
    pub fn put(&self, key: AggregationKey, value: AggregateValue, ttl: Duration) {
        let mut inner = self.inner.write();
        inner
            .scope_index
            .entry(key.scope_id.clone())
            .or_default()
            .insert(key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn put_default(&self, key: AggregationKey, value: AggregateValue) {
        self.put(key, value, self.default_ttl);
    }

    /// Drop every entry tagged with `scope_id`, regardless of statistic or
    /// window. Returns the number of entries removed.
    pub fn invalidate_scope(&self, scope_id: &str) -> usize {
        let mut inner = self.inner.write();
        let keys = match inner.scope_index.remove(scope_id) {
            Some(keys) => keys,
            None => return 0,
        };

        let mut removed = 0usize;
        for key in keys {
            if inner.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        self.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Physically drop expired entries. Run periodically; correctness never
    /// depends on it because `get` checks freshness itself.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.write();

        let expired: Vec<AggregationKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.entries.remove(key);
            if let Some(keys) = inner.scope_index.get_mut(&key.scope_id) {
                keys.remove(key);
                if keys.is_empty() {
                    inner.scope_index.remove(&key.scope_id);
                }
            }
        }

        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.inner.read().entries.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AgentPerformance;

    fn perf(total: i64) -> AggregateValue {
        AggregateValue::AgentPerformance(AgentPerformance {
            total_transactions: total,
            successful_transactions: total,
            failed_transactions: 0,
            total_amount: total as f64 * 100.0,
            total_commission: 0.0,
            total_markup: 0.0,
            success_rate: 100.0,
            average_transaction_amount: 100.0,
            daily_trends: vec![],
        })
    }

    #[test]
    fn test_get_put_roundtrip() {
        let cache = AggregationCache::new(Duration::from_secs(300));
        let key = AggregationKey::agent_performance("agent-1");

        assert!(cache.get(&key).is_none());
        cache.put_default(key.clone(), perf(3));
        assert_eq!(cache.get(&key), Some(perf(3)));
    }

    #[test]
    fn test_put_overwrites_unconditionally() {
        let cache = AggregationCache::new(Duration::from_secs(300));
        let key = AggregationKey::agent_performance("agent-1");

        cache.put_default(key.clone(), perf(1));
        cache.put_default(key.clone(), perf(2));
        assert_eq!(cache.get(&key), Some(perf(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_logically_absent() {
        let cache = AggregationCache::new(Duration::from_secs(300));
        let key = AggregationKey::agent_performance("agent-1");

        cache.put(key.clone(), perf(1), Duration::from_millis(10));
        assert!(cache.get(&key).is_some());

        std::thread::sleep(Duration::from_millis(25));
        // Physically retained, logically gone
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_invalidate_scope_clears_all_windows() {
        let cache = AggregationCache::new(Duration::from_secs(300));
        cache.put_default(AggregationKey::agent_performance("agent-1"), perf(1));
        cache.put_default(
            AggregationKey::agent_transactions("agent-1", None, None),
            AggregateValue::Transactions(vec![]),
        );
        cache.put_default(
            AggregationKey::agent_transactions("agent-1", Some("2026-08-01"), Some("2026-08-02")),
            AggregateValue::Transactions(vec![]),
        );
        cache.put_default(AggregationKey::agent_performance("agent-2"), perf(9));

        assert_eq!(cache.invalidate_scope("agent-1"), 3);
        assert!(cache.get(&AggregationKey::agent_performance("agent-1")).is_none());
        // Other scopes untouched
        assert_eq!(
            cache.get(&AggregationKey::agent_performance("agent-2")),
            Some(perf(9))
        );
    }

    #[test]
    fn test_invalidate_unknown_scope_is_noop() {
        let cache = AggregationCache::new(Duration::from_secs(300));
        assert_eq!(cache.invalidate_scope("nobody"), 0);
    }

    #[test]
    fn test_region_and_agent_scopes_are_independent() {
        let cache = AggregationCache::new(Duration::from_secs(300));
        cache.put_default(AggregationKey::agent_performance("lagos"), perf(1));
        cache.put_default(
            AggregationKey::region_performance("lagos"),
            AggregateValue::RegionPerformance(RegionPerformance {
                region_id: "lagos".to_string(),
                agent_count: 2,
                total_transactions: 10,
                successful_transactions: 10,
                failed_transactions: 0,
                total_amount: 1000.0,
                commission_earned: 5.0,
                success_rate: 100.0,
                average_transaction_value: 100.0,
            }),
        );

        // Same scope_id string clears both keys: the index is id-keyed.
        assert_eq!(cache.invalidate_scope("lagos"), 2);
    }

    #[test]
    fn test_purge_expired_removes_and_reindexes() {
        let cache = AggregationCache::new(Duration::from_secs(300));
        cache.put(
            AggregationKey::agent_performance("agent-1"),
            perf(1),
            Duration::from_millis(5),
        );
        cache.put_default(AggregationKey::agent_performance("agent-2"), perf(2));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate_scope("agent-1"), 0);
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let cache = AggregationCache::new(Duration::from_secs(300));
        let key = AggregationKey::agent_performance("agent-1");

        cache.get(&key);
        cache.put_default(key.clone(), perf(1));
        cache.get(&key);
        cache.get(&key);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    }

    #[test]
    fn test_exact_window_tuple_equality() {
        let a = AggregationKey::agent_transactions("agent-1", Some("2026-08-01"), None);
        let b = AggregationKey::agent_transactions("agent-1", Some("2026-08-01"), None);
        let c = AggregationKey::agent_transactions("agent-1", None, Some("2026-08-01"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
