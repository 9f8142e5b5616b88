//! Projection Engine - type-agnostic signal processing
//!
//! The engine receives generic projection signals from the backend and
//! updates the hot cache. Waypoint does NOT interpret signal content -
//! it stores what the backend tells it to store. Signals carry explicit
//! metadata (search_tokens, invalidates, ttl) so any type can be
//! processed without parsing the data field.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::types::Result;

use super::document::ProjectedDocument;
use super::store::ProjectionStore;

/// Generic projection signal from the backend.
///
/// Actions:
/// - `"commit"` / `"update"`: store/update a document
/// - `"delete"`: drop a document from the hot cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionSignal {
    /// Document type (e.g., "Content", "LearningPath", "MyCustomType")
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Action ("commit", "update", "delete")
    pub action: String,
    /// Document ID
    pub id: String,
    /// Opaque data - waypoint never parses this
    pub data: JsonValue,
    /// Record version (monotonic per document)
    #[serde(default)]
    pub version: u64,
    /// Search tokens computed by the backend
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_tokens: Vec<String>,
    /// Cache keys to invalidate (e.g., ["LearningPath:governance-intro"])
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalidates: Vec<String>,
    /// TTL in seconds (None = store default)
    #[serde(default, rename = "ttl", skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

/// Projection Engine - applies backend signals to the hot cache
pub struct ProjectionEngine {
    store: Arc<ProjectionStore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ProjectionEngine {
    pub fn new(store: Arc<ProjectionStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { store, shutdown_tx }
    }

    /// Get a shutdown receiver for graceful termination
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown to the engine
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Process a single projection signal.
    pub fn process_signal(&self, signal: ProjectionSignal) -> Result<()> {
        debug!(
            doc_type = signal.doc_type,
            action = signal.action,
            id = signal.id,
            "Processing projection signal"
        );

        match signal.action.as_str() {
            "commit" | "update" => {
                let mut doc = ProjectedDocument::new(&signal.doc_type, &signal.id, signal.data)
                    .with_version(signal.version);
                if !signal.search_tokens.is_empty() {
                    doc = doc.with_search_tokens(signal.search_tokens.clone());
                }
                self.store.set(doc, signal.ttl_secs);
            }
            "delete" => {
                let pattern = format!("{}:{}", signal.doc_type, signal.id);
                self.store.invalidate(&pattern);
            }
            other => {
                debug!(action = other, "Unknown signal action, ignoring");
            }
        }

        // Apply cross-document invalidations from the backend
        for pattern in &signal.invalidates {
            let count = self.store.invalidate(pattern);
            if count == 0 {
                warn!(pattern = pattern, "Invalidation pattern matched nothing");
            }
        }

        Ok(())
    }
}

/// Spawn the engine task: listens for signals and applies them until the
/// channel closes or shutdown is signaled.
pub fn spawn_engine_task(
    engine: Arc<ProjectionEngine>,
    mut signal_rx: broadcast::Receiver<ProjectionSignal>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown_rx = engine.shutdown_receiver();

        info!("Projection engine started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Projection engine shutting down");
                    break;
                }
                signal = signal_rx.recv() => {
                    match signal {
                        Ok(sig) => {
                            if let Err(e) = engine.process_signal(sig) {
                                error!("Error processing projection signal: {}", e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Projection engine lagged {} messages", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Signal channel closed, engine stopping");
                            break;
                        }
                    }
                }
            }
        }

        info!("Projection engine stopped");
    })
}
