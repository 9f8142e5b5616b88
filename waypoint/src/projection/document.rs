//! Projected document - opaque payload container
//!
//! Waypoint does NOT interpret payloads. The backend computes search
//! tokens and invalidation keys; waypoint just carries them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A projected view of a ledger record, held in the hot cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedDocument {
    /// Document type (e.g., "Content", "LearningPath")
    pub doc_type: String,
    /// Document ID
    pub doc_id: String,
    /// Opaque payload - waypoint never parses this
    pub data: JsonValue,
    /// Record version from the backend (monotonic per document)
    #[serde(default)]
    pub version: u64,
    /// Search tokens computed by the backend
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_tokens: Vec<String>,
    /// When this projection was created
    pub projected_at: DateTime<Utc>,
}

impl ProjectedDocument {
    pub fn new(doc_type: impl Into<String>, doc_id: impl Into<String>, data: JsonValue) -> Self {
        Self {
            doc_type: doc_type.into(),
            doc_id: doc_id.into(),
            data,
            version: 0,
            search_tokens: Vec::new(),
            projected_at: Utc::now(),
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_search_tokens(mut self, tokens: Vec<String>) -> Self {
        self.search_tokens = tokens;
        self
    }

    /// Cache key: "{doc_type}:{doc_id}"
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.doc_type, self.doc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_and_cache_key() {
        let doc = ProjectedDocument::new("Content", "manifesto", serde_json::json!({"t": 1}))
            .with_version(3)
            .with_search_tokens(vec!["governance".to_string()]);

        assert_eq!(doc.cache_key(), "Content:manifesto");
        assert_eq!(doc.version, 3);
        assert_eq!(doc.search_tokens.len(), 1);
    }

    #[test]
    fn payload_stays_opaque_through_serde() {
        let doc = ProjectedDocument::new(
            "CustomType",
            "x",
            serde_json::json!({"nested": {"anything": [1, 2, 3]}}),
        );
        let json = serde_json::to_string(&doc).unwrap();
        let back: ProjectedDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, doc.data);
    }
}
