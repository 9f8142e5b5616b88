//! Content resolution - tiered source routing
//!
//! Read path fallback chain: projection (fast, local) → ledger
//! (authoritative, slow) → delivery mirror (last resort). Each remote tier
//! gets its own timeout so a slow ledger degrades to the mirror instead of
//! stalling the request.
//!
//! Remote fetches run as spawned tasks awaited under a timeout. When a
//! tier times out, the request moves on but the fetch keeps running and
//! back-fills the projection on completion, so the next request for the
//! same document hits the hot cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::ledger::{DeliveryClient, LedgerClient, LedgerRecord};
use crate::projection::{ProjectedDocument, ProjectionStore};
use crate::types::{Result, WaypointError};

/// Which tier answered a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    Projection,
    Ledger,
    Delivery,
}

/// Result of content resolution with metadata
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionResult {
    /// The resolved payload
    pub data: serde_json::Value,
    /// Which tier provided the content
    pub tier: SourceTier,
    /// Resolution time in milliseconds
    pub duration_ms: f64,
}

/// Content resolution statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolutionStats {
    pub resolution_count: u64,
    pub projection_hits: u64,
    pub ledger_fallbacks: u64,
    pub delivery_fallbacks: u64,
    pub tier_timeouts: u64,
    pub failures: u64,
    pub avg_resolution_ms: f64,
}

/// Per-tier timeouts
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub ledger_timeout_ms: u64,
    pub delivery_timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ledger_timeout_ms: 2000,
            delivery_timeout_ms: 1500,
        }
    }
}

/// Content resolver with tiered fallback
pub struct ContentResolver {
    projection: Arc<ProjectionStore>,
    ledger: Option<Arc<dyn LedgerClient>>,
    delivery: Option<Arc<dyn DeliveryClient>>,
    config: ResolverConfig,
    stats: std::sync::RwLock<ResolutionStats>,
}

impl ContentResolver {
    pub fn new(
        projection: Arc<ProjectionStore>,
        ledger: Option<Arc<dyn LedgerClient>>,
        delivery: Option<Arc<dyn DeliveryClient>>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            projection,
            ledger,
            delivery,
            config,
            stats: std::sync::RwLock::new(ResolutionStats::default()),
        }
    }

    /// Resolve any content type by id with automatic fallback.
    ///
    /// Type-agnostic: the doc_type string passes through to every tier.
    /// Tier failures and timeouts are absorbed as misses; the only error
    /// a caller sees is `NotFound`, with diagnostics in the stats.
    pub async fn resolve(&self, doc_type: &str, id: &str) -> Result<ResolutionResult> {
        let start = Instant::now();
        let result = self.try_resolve(doc_type, id).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.update_stats(&result, duration_ms);

        result.map(|(data, tier)| ResolutionResult {
            data,
            tier,
            duration_ms,
        })
    }

    async fn try_resolve(
        &self,
        doc_type: &str,
        id: &str,
    ) -> Result<(serde_json::Value, SourceTier)> {
        if let Some(doc) = self.projection.get(doc_type, id) {
            debug!(doc_type = doc_type, id = id, "Projection hit");
            return Ok((doc.data, SourceTier::Projection));
        }

        if let Some(ref ledger) = self.ledger {
            debug!(doc_type = doc_type, id = id, "Falling back to ledger");
            let fetch = spawn_fetch_ledger(
                Arc::clone(ledger),
                Arc::clone(&self.projection),
                doc_type.to_string(),
                id.to_string(),
            );
            match timeout(Duration::from_millis(self.config.ledger_timeout_ms), fetch).await {
                Ok(Ok(Some(doc))) => return Ok((doc.data, SourceTier::Ledger)),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!(doc_type = doc_type, id = id, error = %e, "Ledger fetch task failed"),
                Err(_) => {
                    self.count_timeout();
                    let absorbed = WaypointError::TierTimeout {
                        tier: "ledger".to_string(),
                        elapsed_ms: self.config.ledger_timeout_ms,
                    };
                    warn!(
                        doc_type = doc_type,
                        id = id,
                        error = %absorbed,
                        "Treating timed-out tier as a miss, fetch continues in background"
                    );
                }
            }
        }

        if let Some(ref delivery) = self.delivery {
            debug!(doc_type = doc_type, id = id, "Falling back to delivery mirror");
            let fetch = spawn_fetch_delivery(
                Arc::clone(delivery),
                Arc::clone(&self.projection),
                doc_type.to_string(),
                id.to_string(),
            );
            match timeout(Duration::from_millis(self.config.delivery_timeout_ms), fetch).await {
                Ok(Ok(Some(doc))) => return Ok((doc.data, SourceTier::Delivery)),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!(doc_type = doc_type, id = id, error = %e, "Delivery fetch task failed"),
                Err(_) => {
                    self.count_timeout();
                    let absorbed = WaypointError::TierTimeout {
                        tier: "delivery".to_string(),
                        elapsed_ms: self.config.delivery_timeout_ms,
                    };
                    warn!(
                        doc_type = doc_type,
                        id = id,
                        error = %absorbed,
                        "Treating timed-out tier as a miss, fetch continues in background"
                    );
                }
            }
        }

        Err(WaypointError::NotFound(format!("{}/{}", doc_type, id)))
    }

    fn count_timeout(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.tier_timeouts += 1;
        }
    }

    fn update_stats(&self, result: &Result<(serde_json::Value, SourceTier)>, duration_ms: f64) {
        if let Ok(mut stats) = self.stats.write() {
            stats.resolution_count += 1;

            match result {
                Ok((_, tier)) => match tier {
                    SourceTier::Projection => stats.projection_hits += 1,
                    SourceTier::Ledger => stats.ledger_fallbacks += 1,
                    SourceTier::Delivery => stats.delivery_fallbacks += 1,
                },
                Err(_) => stats.failures += 1,
            }

            let n = stats.resolution_count as f64;
            stats.avg_resolution_ms = stats.avg_resolution_ms * ((n - 1.0) / n) + duration_ms / n;
        }
    }

    /// Get resolution statistics.
    pub fn get_stats(&self) -> ResolutionStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }
}

fn record_to_doc(record: LedgerRecord) -> (ProjectedDocument, Option<u64>) {
    let ttl = record.ttl_secs;
    let doc = ProjectedDocument::new(record.doc_type, record.id, record.payload)
        .with_version(record.version)
        .with_search_tokens(record.search_tokens);
    (doc, ttl)
}

/// Spawned so the fetch survives an abandoning caller: on success the
/// projection is back-filled before the document is returned.
fn spawn_fetch_ledger(
    ledger: Arc<dyn LedgerClient>,
    projection: Arc<ProjectionStore>,
    doc_type: String,
    id: String,
) -> tokio::task::JoinHandle<Option<ProjectedDocument>> {
    tokio::spawn(async move {
        match ledger.fetch(&doc_type, &id).await {
            Ok(Some(record)) => {
                let (doc, ttl) = record_to_doc(record);
                projection.set(doc.clone(), ttl);
                Some(doc)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(doc_type = doc_type, id = id, error = %e, "Ledger fetch failed");
                None
            }
        }
    })
}

fn spawn_fetch_delivery(
    delivery: Arc<dyn DeliveryClient>,
    projection: Arc<ProjectionStore>,
    doc_type: String,
    id: String,
) -> tokio::task::JoinHandle<Option<ProjectedDocument>> {
    tokio::spawn(async move {
        match delivery.fetch(&doc_type, &id).await {
            Ok(Some(record)) => {
                let (doc, ttl) = record_to_doc(record);
                projection.set(doc.clone(), ttl);
                Some(doc)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(doc_type = doc_type, id = id, error = %e, "Delivery fetch failed");
                None
            }
        }
    })
}
