//! Projection Store - hot cache for projected documents
//!
//! In-memory only: the backend ledger is the source of truth and every
//! entry here is reconstructible from it. Reads are lock-free via DashMap;
//! a broadcast channel fans out updates to interested tasks.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use super::document::ProjectedDocument;

/// Hot cache entry with its own TTL
#[derive(Debug, Clone)]
struct HotCacheEntry {
    doc: ProjectedDocument,
    cached_at: std::time::Instant,
    ttl_secs: Option<u64>,
}

impl HotCacheEntry {
    fn new(doc: ProjectedDocument, ttl_secs: Option<u64>) -> Self {
        Self {
            doc,
            cached_at: std::time::Instant::now(),
            ttl_secs,
        }
    }

    fn is_expired(&self, default_ttl_secs: u64) -> bool {
        let ttl = self.ttl_secs.unwrap_or(default_ttl_secs);
        self.cached_at.elapsed().as_secs() > ttl
    }
}

/// Projection store configuration
#[derive(Debug, Clone)]
pub struct ProjectionConfig {
    /// Maximum entries in the hot cache
    pub max_entries: usize,
    /// Default TTL in seconds, applied when a document carries none
    pub default_ttl_secs: u64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl_secs: 300,
        }
    }
}

/// Hot cache counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectionStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

/// Projection store - opaque payload hot cache
pub struct ProjectionStore {
    hot_cache: DashMap<String, HotCacheEntry>,
    config: ProjectionConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    /// Broadcast sender for projection updates
    update_tx: broadcast::Sender<ProjectedDocument>,
}

impl ProjectionStore {
    pub fn new(config: ProjectionConfig) -> Self {
        let (update_tx, _) = broadcast::channel(1000);
        Self {
            hot_cache: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            update_tx,
        }
    }

    /// Get a projected document by type and id. Expired entries are removed
    /// on access and count as misses.
    pub fn get(&self, doc_type: &str, doc_id: &str) -> Option<ProjectedDocument> {
        let cache_key = format!("{}:{}", doc_type, doc_id);

        if let Some(entry) = self.hot_cache.get(&cache_key) {
            if !entry.is_expired(self.config.default_ttl_secs) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.doc.clone());
            }
            drop(entry);
            self.hot_cache.remove(&cache_key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a projected document, broadcasting the update.
    pub fn set(&self, doc: ProjectedDocument, ttl_secs: Option<u64>) {
        let cache_key = doc.cache_key();
        self.hot_cache
            .insert(cache_key, HotCacheEntry::new(doc.clone(), ttl_secs));
        self.evict_if_needed();
        let _ = self.update_tx.send(doc);
    }

    /// Invalidate projections by pattern.
    ///
    /// Patterns: "{doc_type}:{doc_id}" for one document, "{doc_type}:*" for
    /// all of a type, "*" for everything. Returns the number removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let count = if pattern == "*" {
            let count = self.hot_cache.len();
            self.hot_cache.clear();
            count
        } else if let Some(doc_type) = pattern.strip_suffix(":*") {
            let keys_to_remove: Vec<String> = self
                .hot_cache
                .iter()
                .filter(|entry| entry.doc.doc_type == doc_type)
                .map(|entry| entry.key().clone())
                .collect();
            let count = keys_to_remove.len();
            for key in keys_to_remove {
                self.hot_cache.remove(&key);
            }
            count
        } else if self.hot_cache.remove(pattern).is_some() {
            1
        } else {
            0
        };

        if count > 0 {
            self.invalidations.fetch_add(count as u64, Ordering::Relaxed);
            debug!(pattern = pattern, count = count, "Projections invalidated");
        }
        count
    }

    /// Subscribe to projection updates
    pub fn subscribe(&self) -> broadcast::Receiver<ProjectedDocument> {
        self.update_tx.subscribe()
    }

    pub fn stats(&self) -> ProjectionStats {
        ProjectionStats {
            entries: self.hot_cache.len(),
            max_entries: self.config.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Drop expired entries first, then oldest, until under capacity.
    fn evict_if_needed(&self) {
        if self.hot_cache.len() <= self.config.max_entries {
            return;
        }

        let expired_keys: Vec<String> = self
            .hot_cache
            .iter()
            .filter(|entry| entry.is_expired(self.config.default_ttl_secs))
            .map(|entry| entry.key().clone())
            .collect();
        for key in expired_keys {
            self.hot_cache.remove(&key);
        }

        while self.hot_cache.len() > self.config.max_entries {
            let oldest = self
                .hot_cache
                .iter()
                .min_by_key(|entry| entry.cached_at)
                .map(|entry| entry.key().clone());

            match oldest {
                Some(key) => {
                    self.hot_cache.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(doc_type: &str, id: &str) -> ProjectedDocument {
        ProjectedDocument::new(doc_type, id, serde_json::json!({"id": id}))
    }

    #[test]
    fn set_get_roundtrip() {
        let store = ProjectionStore::new(ProjectionConfig::default());
        store.set(doc("Content", "test-123"), None);

        let retrieved = store.get("Content", "test-123");
        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().doc_id, "test-123");

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn per_document_ttl_expires() {
        let store = ProjectionStore::new(ProjectionConfig::default());
        store.set(doc("Content", "ephemeral"), Some(0));

        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(store.get("Content", "ephemeral").is_none());
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn invalidate_exact_and_wildcard() {
        let store = ProjectionStore::new(ProjectionConfig::default());
        store.set(doc("Content", "a"), None);
        store.set(doc("Content", "b"), None);
        store.set(doc("Path", "c"), None);

        assert_eq!(store.invalidate("Content:a"), 1);
        assert_eq!(store.invalidate("Content:a"), 0);
        assert_eq!(store.invalidate("Content:*"), 1);
        assert!(store.get("Content", "b").is_none());
        assert!(store.get("Path", "c").is_some());

        assert_eq!(store.invalidate("*"), 1);
        assert_eq!(store.stats().entries, 0);
    }

    #[test]
    fn capacity_eviction_keeps_newest() {
        let store = ProjectionStore::new(ProjectionConfig {
            max_entries: 5,
            default_ttl_secs: 300,
        });
        for i in 0..10 {
            store.set(doc("Content", &format!("d{i}")), None);
        }
        assert!(store.stats().entries <= 5);
        assert!(store.get("Content", "d9").is_some());
    }

    #[tokio::test]
    async fn updates_are_broadcast() {
        let store = ProjectionStore::new(ProjectionConfig::default());
        let mut rx = store.subscribe();
        store.set(doc("Content", "announced"), None);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.doc_id, "announced");
    }
}
