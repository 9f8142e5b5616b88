//! Reach-isolated caching with priority-aware eviction.
//!
//! [`EvictionCache`] maintains one independently budgeted LRU pool per
//! reach level, so pressure on widely shared content can never evict
//! private content and vice versa. Eviction within a pool ranks the oldest
//! entries by a deterministic priority score instead of evicting blindly
//! by age.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod entry;
pub mod reach;

pub use entry::{
    BandwidthClass, CacheEntry, CustodianHealth, FreshnessStatus, MasteryLevel, ReachLevel,
    StewardTier,
};
pub use reach::ReachCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache entry: {0}")]
    InvalidEntry(String),
}

/// Per-reach budgets and eviction tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvictionCacheConfig {
    /// Byte budget per reach level, indexed by `ReachLevel as u8`
    pub reach_budgets: [u64; ReachLevel::COUNT],
    /// Entries larger than this are rejected outright
    pub max_entry_bytes: u64,
    /// Oldest-entry window ranked by priority on each eviction
    pub eviction_window: usize,
    /// Idle expiry for `cleanup_all_reaches`; None disables expiry
    pub entry_ttl_ms: Option<u64>,
}

impl EvictionCacheConfig {
    /// Same budget for every reach level.
    pub fn uniform(budget_bytes: u64) -> Self {
        Self {
            reach_budgets: [budget_bytes; ReachLevel::COUNT],
            ..Self::default()
        }
    }
}

impl Default for EvictionCacheConfig {
    fn default() -> Self {
        Self {
            reach_budgets: [64 * 1024 * 1024; ReachLevel::COUNT],
            max_entry_bytes: 16 * 1024 * 1024,
            eviction_window: 16,
            entry_ttl_ms: None,
        }
    }
}

/// Counters for one reach level, or the aggregate across all of them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: u32,
    pub total_size_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            return 0.0;
        }
        self.hit_count as f64 / total as f64
    }
}

/// Reverse lookups maintained alongside the reach pools. Values are
/// `(entry_id, reach_level)` so a query result can be fetched from the
/// right pool without probing all eight.
#[derive(Default)]
struct SecondaryIndexes {
    domain_epic: HashMap<(String, String), HashSet<(String, u8)>>,
    custodian: HashMap<String, HashSet<(String, u8)>>,
}

impl SecondaryIndexes {
    fn add(&mut self, entry: &CacheEntry) {
        let key = (entry.id.clone(), entry.reach_level);
        self.domain_epic
            .entry((entry.domain.clone(), entry.epic.clone()))
            .or_default()
            .insert(key.clone());
        if let Some(custodian) = &entry.custodian_id {
            self.custodian
                .entry(custodian.clone())
                .or_default()
                .insert(key);
        }
    }

    fn remove(&mut self, entry: &CacheEntry) {
        let key = (entry.id.clone(), entry.reach_level);
        let de_key = (entry.domain.clone(), entry.epic.clone());
        if let Some(set) = self.domain_epic.get_mut(&de_key) {
            set.remove(&key);
            if set.is_empty() {
                self.domain_epic.remove(&de_key);
            }
        }
        if let Some(custodian) = &entry.custodian_id {
            if let Some(set) = self.custodian.get_mut(custodian) {
                set.remove(&key);
                if set.is_empty() {
                    self.custodian.remove(custodian);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.domain_epic.clear();
        self.custodian.clear();
    }
}

/// Reach-aware cache: one [`ReachCache`] per reach level behind its own
/// lock, plus shared secondary indices.
///
/// Locking order is always pool first, indices second, and never more than
/// one pool at a time.
pub struct EvictionCache {
    reaches: [Mutex<ReachCache>; ReachLevel::COUNT],
    indexes: Mutex<SecondaryIndexes>,
    config: EvictionCacheConfig,
    total_hits: AtomicU64,
    total_misses: AtomicU64,
}

impl EvictionCache {
    pub fn new(config: EvictionCacheConfig) -> Self {
        let reaches = std::array::from_fn(|i| Mutex::new(ReachCache::new(config.reach_budgets[i])));
        Self {
            reaches,
            indexes: Mutex::new(SecondaryIndexes::default()),
            config,
            total_hits: AtomicU64::new(0),
            total_misses: AtomicU64::new(0),
        }
    }

    /// Insert an entry into its reach pool, evicting within that pool if
    /// the pool goes over budget. Returns the number of entries evicted.
    pub fn put(&self, entry: CacheEntry) -> Result<usize, CacheError> {
        if ReachLevel::from_u8(entry.reach_level).is_none() {
            return Err(CacheError::InvalidEntry(format!(
                "reach level {} out of range for entry {}",
                entry.reach_level, entry.id
            )));
        }
        if entry.size_bytes > self.config.max_entry_bytes {
            return Err(CacheError::InvalidEntry(format!(
                "entry {} is {} bytes, max is {}",
                entry.id, entry.size_bytes, self.config.max_entry_bytes
            )));
        }

        let reach = entry.reach_level as usize;
        let (replaced, evicted) = {
            let mut pool = self.reaches[reach].lock();
            pool.put(entry.clone(), self.config.eviction_window)
        };

        let mut indexes = self.indexes.lock();
        if let Some(old) = &replaced {
            indexes.remove(old);
        }
        for gone in &evicted {
            indexes.remove(gone);
        }
        indexes.add(&entry);

        Ok(evicted.len())
    }

    /// Look up an entry in one reach pool. A hit refreshes its LRU slot;
    /// a miss (including an out-of-range reach level) is just a counter.
    pub fn get(&self, id: &str, reach_level: u8) -> Option<CacheEntry> {
        let Some(reach) = ReachLevel::from_u8(reach_level) else {
            self.total_misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let found = self.reaches[reach as usize].lock().get(id, current_time_ms());
        match &found {
            Some(_) => self.total_hits.fetch_add(1, Ordering::Relaxed),
            None => self.total_misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Remove an entry and its index references. Returns whether it existed.
    pub fn delete(&self, id: &str, reach_level: u8) -> bool {
        let Some(reach) = ReachLevel::from_u8(reach_level) else {
            return false;
        };

        let removed = self.reaches[reach as usize].lock().delete(id);
        match removed {
            Some(entry) => {
                self.indexes.lock().remove(&entry);
                true
            }
            None => false,
        }
    }

    /// Entry ids (with their reach level) cached for a domain/epic pair.
    pub fn query_by_domain_epic(&self, domain: &str, epic: &str) -> Vec<(String, u8)> {
        let indexes = self.indexes.lock();
        indexes
            .domain_epic
            .get(&(domain.to_string(), epic.to_string()))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Entry ids (with their reach level) held by a custodian.
    pub fn query_by_custodian(&self, custodian_id: &str) -> Vec<(String, u8)> {
        let indexes = self.indexes.lock();
        indexes
            .custodian
            .get(custodian_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Counters for a single reach level.
    pub fn get_reach_stats(&self, reach_level: u8) -> Option<CacheStats> {
        let reach = ReachLevel::from_u8(reach_level)?;
        Some(self.reaches[reach as usize].lock().stats())
    }

    /// Aggregate counters. Entry counts, sizes, and evictions are summed
    /// from the pools; hits and misses come from the global counters so
    /// out-of-range lookups are included.
    pub fn get_global_stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            hit_count: self.total_hits.load(Ordering::Relaxed),
            miss_count: self.total_misses.load(Ordering::Relaxed),
            ..CacheStats::default()
        };
        for pool in &self.reaches {
            let pool_stats = pool.lock().stats();
            stats.entry_count += pool_stats.entry_count;
            stats.total_size_bytes += pool_stats.total_size_bytes;
            stats.eviction_count += pool_stats.eviction_count;
        }
        stats
    }

    /// Expire idle entries across every reach pool. Returns the number
    /// removed. No-op when no TTL is configured.
    pub fn cleanup_all_reaches(&self, now_ms: u64) -> usize {
        let Some(ttl_ms) = self.config.entry_ttl_ms else {
            return 0;
        };

        let mut removed = 0;
        for pool in &self.reaches {
            let expired = pool.lock().cleanup(now_ms, ttl_ms);
            if expired.is_empty() {
                continue;
            }
            removed += expired.len();
            let mut indexes = self.indexes.lock();
            for entry in &expired {
                indexes.remove(entry);
            }
        }
        removed
    }

    pub fn get_total_size(&self) -> u64 {
        self.reaches.iter().map(|pool| pool.lock().size()).sum()
    }

    pub fn clear_all(&self) {
        for pool in &self.reaches {
            pool.lock().clear();
        }
        self.indexes.lock().clear();
    }

    pub fn config(&self) -> &EvictionCacheConfig {
        &self.config
    }
}

fn current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, reach: u8, size: u64) -> CacheEntry {
        CacheEntry {
            id: id.to_string(),
            size_bytes: size,
            created_at: current_time_ms(),
            last_accessed_at: current_time_ms(),
            access_count: 0,
            reach_level: reach,
            domain: "commons".to_string(),
            epic: "governance".to_string(),
            custodian_id: None,
            steward_tier: 1,
            mastery_level: 0,
            custodian_proximity_score: 0,
            bandwidth_class: 2,
            custodian_health: 0,
            content_age_penalty: 0,
            affinity_match: 0.5,
        }
    }

    #[test]
    fn rejects_out_of_range_reach() {
        let cache = EvictionCache::new(EvictionCacheConfig::uniform(10_000));
        let result = cache.put(entry("bad", 8, 100));
        assert!(matches!(result, Err(CacheError::InvalidEntry(_))));
    }

    #[test]
    fn rejects_oversized_entry() {
        let mut config = EvictionCacheConfig::uniform(10_000);
        config.max_entry_bytes = 500;
        let cache = EvictionCache::new(config);
        assert!(cache.put(entry("big", 0, 501)).is_err());
        assert!(cache.put(entry("fits", 0, 500)).is_ok());
    }

    #[test]
    fn reach_levels_evict_independently() {
        let cache = EvictionCache::new(EvictionCacheConfig::uniform(300));

        cache.put(entry("private-1", 0, 150)).expect("put");
        cache.put(entry("private-2", 0, 150)).expect("put");

        // Overflow the commons pool; private entries must survive.
        for i in 0..10 {
            cache.put(entry(&format!("commons-{i}"), 7, 150)).expect("put");
        }

        assert!(cache.get("private-1", 0).is_some());
        assert!(cache.get("private-2", 0).is_some());
        let commons = cache.get_reach_stats(7).expect("stats");
        assert_eq!(commons.entry_count, 2);
        assert_eq!(commons.eviction_count, 8);
    }

    #[test]
    fn get_bumps_access_count_and_counters() {
        let cache = EvictionCache::new(EvictionCacheConfig::uniform(10_000));
        cache.put(entry("a", 3, 100)).expect("put");

        assert_eq!(cache.get("a", 3).expect("hit").access_count, 1);
        assert_eq!(cache.get("a", 3).expect("hit").access_count, 2);
        assert!(cache.get("a", 4).is_none());
        assert!(cache.get("a", 99).is_none());

        let stats = cache.get_global_stats();
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.miss_count, 2);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn secondary_indexes_track_put_delete_and_eviction() {
        let cache = EvictionCache::new(EvictionCacheConfig::uniform(300));

        let mut a = entry("a", 2, 150);
        a.custodian_id = Some("agent-1".to_string());
        let mut b = entry("b", 5, 150);
        b.domain = "ecology".to_string();
        b.custodian_id = Some("agent-1".to_string());
        cache.put(a).expect("put");
        cache.put(b).expect("put");

        assert_eq!(cache.query_by_domain_epic("commons", "governance"), vec![("a".to_string(), 2)]);
        assert_eq!(cache.query_by_domain_epic("ecology", "governance"), vec![("b".to_string(), 5)]);
        let mut held = cache.query_by_custodian("agent-1");
        held.sort();
        assert_eq!(held, vec![("a".to_string(), 2), ("b".to_string(), 5)]);

        // Evicting "a" out of reach 2 must also drop it from the indices.
        let mut newer = entry("c", 2, 300);
        newer.epic = "stewardship".to_string();
        newer.custodian_proximity_score = 100;
        cache.put(newer).expect("put");
        assert!(cache.query_by_domain_epic("commons", "governance").is_empty());
        assert_eq!(
            cache.query_by_domain_epic("commons", "stewardship"),
            vec![("c".to_string(), 2)]
        );
        assert_eq!(cache.query_by_custodian("agent-1"), vec![("b".to_string(), 5)]);

        assert!(cache.delete("b", 5));
        assert!(!cache.delete("b", 5));
        assert!(cache.query_by_custodian("agent-1").is_empty());
    }

    #[test]
    fn overwrite_reindexes_changed_metadata() {
        let cache = EvictionCache::new(EvictionCacheConfig::uniform(10_000));
        let mut first = entry("a", 1, 100);
        first.custodian_id = Some("agent-1".to_string());
        cache.put(first).expect("put");

        let mut second = entry("a", 1, 100);
        second.domain = "ecology".to_string();
        second.custodian_id = Some("agent-2".to_string());
        cache.put(second).expect("put");

        assert!(cache.query_by_domain_epic("commons", "governance").is_empty());
        assert_eq!(cache.query_by_domain_epic("ecology", "governance"), vec![("a".to_string(), 1)]);
        assert!(cache.query_by_custodian("agent-1").is_empty());
        assert_eq!(cache.query_by_custodian("agent-2"), vec![("a".to_string(), 1)]);
    }

    #[test]
    fn cleanup_expires_idle_entries_and_their_index_refs() {
        let mut config = EvictionCacheConfig::uniform(1_000_000);
        config.entry_ttl_ms = Some(60_000);
        let cache = EvictionCache::new(config);

        let now = current_time_ms();
        let mut old = entry("old", 4, 100);
        old.last_accessed_at = now - 120_000;
        old.custodian_id = Some("agent-1".to_string());
        cache.put(old).expect("put");
        cache.put(entry("fresh", 4, 100)).expect("put");

        assert_eq!(cache.cleanup_all_reaches(now), 1);
        assert!(cache.get("old", 4).is_none());
        assert!(cache.get("fresh", 4).is_some());
        assert!(cache.query_by_custodian("agent-1").is_empty());
    }

    #[test]
    fn cleanup_is_a_noop_without_ttl() {
        let cache = EvictionCache::new(EvictionCacheConfig::uniform(1_000_000));
        let now = current_time_ms();
        let mut old = entry("old", 4, 100);
        old.last_accessed_at = now.saturating_sub(10 * 86_400_000);
        cache.put(old).expect("put");
        assert_eq!(cache.cleanup_all_reaches(now), 0);
        assert!(cache.get("old", 4).is_some());
    }

    #[test]
    fn clear_all_resets_every_pool() {
        let cache = EvictionCache::new(EvictionCacheConfig::uniform(10_000));
        for reach in 0..8u8 {
            cache.put(entry(&format!("e{reach}"), reach, 100)).expect("put");
        }
        assert_eq!(cache.get_total_size(), 800);
        cache.clear_all();
        assert_eq!(cache.get_total_size(), 0);
        assert!(cache.query_by_domain_epic("commons", "governance").is_empty());
    }

    // 10,000 entries of 1000 bytes against a 5 MB pool: the cache must
    // retain exactly the 5,000 highest-priority entries. Priority rises
    // with insertion order, so the survivors are the last 5,000 inserted.
    #[test]
    fn retains_highest_priority_half_under_sustained_pressure() {
        let mut config = EvictionCacheConfig::uniform(5_000_000);
        config.max_entry_bytes = 1_000;
        let cache = EvictionCache::new(config);

        for i in 0..10_000u64 {
            let mut e = entry(&format!("e{i}"), 7, 1_000);
            e.created_at = i;
            e.last_accessed_at = i;
            e.bandwidth_class = 3;
            // proximity walks -100..=99, so priority is monotone in i
            e.custodian_proximity_score = (i as i32 / 50) - 100;
            cache.put(e).expect("put");
        }

        let stats = cache.get_reach_stats(7).expect("stats");
        assert_eq!(stats.entry_count, 5_000);
        assert_eq!(stats.total_size_bytes, 5_000_000);
        assert_eq!(stats.eviction_count, 5_000);

        assert!(cache.get("e0", 7).is_none());
        assert!(cache.get("e4999", 7).is_none());
        assert!(cache.get("e5000", 7).is_some());
        assert!(cache.get("e9999", 7).is_some());
    }
}
