//! Single-reach LRU cache with priority-aware eviction.
//!
//! A `BTreeMap` keyed by last-access time provides the LRU ordering, so
//! eviction candidates and expired entries are found without scanning the
//! live set. Eviction is windowed: only the K oldest entries are ranked by
//! priority, bounding the per-eviction cost to O(k log n).

use std::collections::{BTreeMap, HashMap};

use crate::entry::CacheEntry;
use crate::CacheStats;

/// Cache for one visibility level. Not thread-safe on its own; the owning
/// [`EvictionCache`](crate::EvictionCache) wraps each level in its own lock.
pub struct ReachCache {
    // Primary storage: id -> entry
    entries: HashMap<String, CacheEntry>,

    // Time index: last_accessed_at -> ids with that timestamp
    time_index: BTreeMap<u64, Vec<String>>,

    total_size: u64,
    budget: u64,

    hit_count: u64,
    miss_count: u64,
    eviction_count: u64,
}

impl ReachCache {
    pub fn new(budget: u64) -> Self {
        Self {
            entries: HashMap::new(),
            time_index: BTreeMap::new(),
            total_size: 0,
            budget,
            hit_count: 0,
            miss_count: 0,
            eviction_count: 0,
        }
    }

    /// Insert or overwrite an entry, then evict until back under budget.
    ///
    /// Returns the replaced entry (if this was an overwrite) and every
    /// entry evicted to make room, so the caller can keep secondary
    /// indices in sync.
    pub fn put(&mut self, entry: CacheEntry, window: usize) -> (Option<CacheEntry>, Vec<CacheEntry>) {
        let replaced = self.remove_entry(&entry.id);

        self.time_index
            .entry(entry.last_accessed_at)
            .or_default()
            .push(entry.id.clone());
        self.total_size += entry.size_bytes;
        self.entries.insert(entry.id.clone(), entry);

        let evicted = self.evict_to_budget(window);
        (replaced, evicted)
    }

    /// O(1) lookup. A hit bumps the access count and re-slots the entry at
    /// `now_ms` in the time index; a miss is just a counter.
    pub fn get(&mut self, id: &str, now_ms: u64) -> Option<CacheEntry> {
        let Some(entry) = self.entries.get_mut(id) else {
            self.miss_count += 1;
            return None;
        };

        self.hit_count += 1;
        let old_time = entry.last_accessed_at;
        entry.last_accessed_at = now_ms;
        entry.access_count += 1;
        let updated = entry.clone();

        Self::unindex(&mut self.time_index, old_time, id);
        self.time_index
            .entry(now_ms)
            .or_default()
            .push(id.to_string());

        Some(updated)
    }

    /// Remove an entry from both the hash table and the time index.
    pub fn delete(&mut self, id: &str) -> Option<CacheEntry> {
        self.remove_entry(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Remove every entry whose idle time exceeds `ttl_ms` at `now_ms`.
    ///
    /// Walks the time index from its oldest bucket and stops at the first
    /// bucket that is not yet expired, so the cost is proportional to the
    /// number of removals, never the live set.
    pub fn cleanup(&mut self, now_ms: u64, ttl_ms: u64) -> Vec<CacheEntry> {
        self.cleanup_inner(now_ms, ttl_ms).0
    }

    /// Cleanup plus the number of time buckets examined (removals + the one
    /// unexpired bucket that terminates the walk). Exposed for cost
    /// verification in tests.
    pub(crate) fn cleanup_inner(&mut self, now_ms: u64, ttl_ms: u64) -> (Vec<CacheEntry>, usize) {
        let mut removed = Vec::new();
        let mut examined = 0usize;

        while let Some((&oldest, _)) = self.time_index.iter().next() {
            examined += 1;
            if oldest.saturating_add(ttl_ms) > now_ms {
                break;
            }
            if let Some(ids) = self.time_index.remove(&oldest) {
                for id in ids {
                    if let Some(entry) = self.entries.remove(&id) {
                        self.total_size -= entry.size_bytes;
                        removed.push(entry);
                    }
                }
            }
        }

        (removed, examined)
    }

    pub fn size(&self) -> u64 {
        self.total_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len() as u32,
            total_size_bytes: self.total_size,
            hit_count: self.hit_count,
            miss_count: self.miss_count,
            eviction_count: self.eviction_count,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.time_index.clear();
        self.total_size = 0;
    }

    /// Evict until under budget: gather the `window` oldest ids, evict the
    /// lowest-priority one, repeat. Ties go to the older entry.
    fn evict_to_budget(&mut self, window: usize) -> Vec<CacheEntry> {
        let window = window.max(1);
        let mut evicted = Vec::new();

        while self.total_size > self.budget && !self.entries.is_empty() {
            let mut candidates: Vec<(u64, String)> = Vec::with_capacity(window);
            'gather: for (&ts, ids) in self.time_index.iter() {
                for id in ids {
                    candidates.push((ts, id.clone()));
                    if candidates.len() >= window {
                        break 'gather;
                    }
                }
            }

            let mut victim: Option<(u64, String, i32)> = None;
            for (ts, id) in candidates {
                let Some(entry) = self.entries.get(&id) else {
                    continue;
                };
                let score = entry.priority();
                match victim {
                    Some((_, _, best)) if score >= best => {}
                    _ => victim = Some((ts, id, score)),
                }
            }

            let Some((ts, id, _)) = victim else { break };
            if let Some(entry) = self.entries.remove(&id) {
                self.total_size -= entry.size_bytes;
                self.eviction_count += 1;
                Self::unindex(&mut self.time_index, ts, &id);
                evicted.push(entry);
            }
        }

        evicted
    }

    fn remove_entry(&mut self, id: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(id)?;
        self.total_size -= entry.size_bytes;
        Self::unindex(&mut self.time_index, entry.last_accessed_at, id);
        Some(entry)
    }

    fn unindex(time_index: &mut BTreeMap<u64, Vec<String>>, ts: u64, id: &str) {
        if let Some(ids) = time_index.get_mut(&ts) {
            ids.retain(|candidate| candidate != id);
            if ids.is_empty() {
                time_index.remove(&ts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, size: u64, accessed_at: u64, proximity: i32) -> CacheEntry {
        CacheEntry {
            id: id.to_string(),
            size_bytes: size,
            created_at: accessed_at,
            last_accessed_at: accessed_at,
            access_count: 0,
            reach_level: 7,
            domain: "commons".to_string(),
            epic: "governance".to_string(),
            custodian_id: None,
            steward_tier: 1,
            mastery_level: 0,
            custodian_proximity_score: proximity,
            bandwidth_class: 2,
            custodian_health: 0,
            content_age_penalty: 0,
            affinity_match: 0.5,
        }
    }

    #[test]
    fn get_after_put_updates_access_metadata() {
        let mut cache = ReachCache::new(10_000);
        cache.put(entry("a", 100, 1_000, 0), 8);

        let got = cache.get("a", 5_000).expect("hit");
        assert_eq!(got.access_count, 1);
        assert_eq!(got.last_accessed_at, 5_000);

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 0);
    }

    #[test]
    fn miss_is_not_an_error() {
        let mut cache = ReachCache::new(10_000);
        assert!(cache.get("absent", 0).is_none());
        assert_eq!(cache.stats().miss_count, 1);
    }

    #[test]
    fn eviction_prefers_lowest_priority_in_window() {
        // Budget fits two entries; the oldest two form the window.
        let mut cache = ReachCache::new(200);
        cache.put(entry("low", 100, 10, -50), 4);
        cache.put(entry("high", 100, 20, 80), 4);

        let (_, evicted) = cache.put(entry("new", 100, 30, 0), 4);
        let ids: Vec<&str> = evicted.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["low"]);
        assert!(cache.contains("high"));
        assert!(cache.contains("new"));
    }

    #[test]
    fn eviction_falls_back_to_oldest_on_ties() {
        let mut cache = ReachCache::new(200);
        cache.put(entry("older", 100, 10, 0), 4);
        cache.put(entry("newer", 100, 20, 0), 4);

        let (_, evicted) = cache.put(entry("new", 100, 30, 0), 4);
        assert_eq!(evicted[0].id, "older");
    }

    #[test]
    fn overwrite_adjusts_size_and_reports_replaced() {
        let mut cache = ReachCache::new(10_000);
        cache.put(entry("a", 100, 10, 0), 8);
        let (replaced, _) = cache.put(entry("a", 300, 20, 0), 8);
        assert_eq!(replaced.expect("replaced").size_bytes, 100);
        assert_eq!(cache.size(), 300);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cleanup_removes_exactly_the_expired_set() {
        let mut cache = ReachCache::new(1_000_000);
        for i in 0..1_000u64 {
            cache.put(entry(&format!("e{i}"), 10, i, 0), 8);
        }

        // ttl 100ms at now=200: entries with last access <= 100 expire
        let (removed, examined) = cache.cleanup_inner(200, 100);
        assert_eq!(removed.len(), 101);
        assert!(removed.iter().all(|e| e.last_accessed_at <= 100));
        assert_eq!(cache.len(), 899);

        // Walk cost is the expired buckets plus the terminating peek, not
        // the live set.
        assert_eq!(examined, 102);
    }

    #[test]
    fn cleanup_with_nothing_expired_touches_one_bucket() {
        let mut cache = ReachCache::new(1_000_000);
        for i in 0..100u64 {
            cache.put(entry(&format!("e{i}"), 10, 1_000 + i, 0), 8);
        }
        let (removed, examined) = cache.cleanup_inner(1_050, 10_000);
        assert!(removed.is_empty());
        assert_eq!(examined, 1);
    }

    #[test]
    fn delete_unindexes() {
        let mut cache = ReachCache::new(1_000);
        cache.put(entry("a", 100, 10, 0), 8);
        assert!(cache.delete("a").is_some());
        assert!(cache.delete("a").is_none());
        assert_eq!(cache.size(), 0);
        assert!(cache.cleanup(1_000_000, 0).is_empty());
    }
}
