//! Ledger and delivery clients
//!
//! The ledger is the authoritative backend: slow, strongly consistent,
//! expensive to hit. The delivery network is a geographically distributed
//! read-only mirror used as a last resort when the ledger is slow or
//! unreachable. Both are behind traits so the resolver and write buffer
//! can be exercised against mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::cache::write_buffer::WriteOp;
use crate::types::{Result, WaypointError};

/// A record as returned by the ledger or delivery network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub doc_type: String,
    pub id: String,
    /// Opaque payload
    pub payload: JsonValue,
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_tokens: Vec<String>,
    /// Cache TTL hint in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

/// Outcome of a batch submission. Operations not listed in `failed`
/// were accepted by the ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub accepted: usize,
    #[serde(default)]
    pub failed: Vec<FailedOp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedOp {
    pub operation_id: Uuid,
    pub reason: String,
}

/// Authoritative backend client
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch a single record. `Ok(None)` means the record does not exist;
    /// `Err` means the ledger could not answer.
    async fn fetch(&self, doc_type: &str, id: &str) -> Result<Option<LedgerRecord>>;

    /// Collection query, passed through verbatim. The ledger owns all
    /// query semantics; the gateway never interprets the parameters.
    async fn query(&self, doc_type: &str, raw_query: Option<&str>) -> Result<JsonValue>;

    /// Submit a batch of writes. Per-operation failures are reported in
    /// the outcome; an `Err` means the whole batch failed.
    async fn submit_batch(&self, ops: &[WriteOp]) -> Result<BatchOutcome>;
}

/// Read-only delivery mirror client
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn fetch(&self, doc_type: &str, id: &str) -> Result<Option<LedgerRecord>>;
}

/// HTTP client for the ledger backend
pub struct HttpLedgerClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpLedgerClient {
    pub fn new(base_url: &str, request_timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(request_timeout_ms))
            .build()
            .map_err(|e| WaypointError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn fetch(&self, doc_type: &str, id: &str) -> Result<Option<LedgerRecord>> {
        let url = format!("{}/records/{}/{}", self.base_url, doc_type, id);
        let response = self.http.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(WaypointError::Ledger(format!(
                "ledger returned {} for {}",
                response.status(),
                url
            )));
        }

        let record = response.json::<LedgerRecord>().await?;
        Ok(Some(record))
    }

    async fn query(&self, doc_type: &str, raw_query: Option<&str>) -> Result<JsonValue> {
        let url = match raw_query {
            Some(q) => format!("{}/records/{}?{}", self.base_url, doc_type, q),
            None => format!("{}/records/{}", self.base_url, doc_type),
        };
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(WaypointError::Ledger(format!(
                "ledger query returned {} for {}",
                response.status(),
                url
            )));
        }

        Ok(response.json::<JsonValue>().await?)
    }

    async fn submit_batch(&self, ops: &[WriteOp]) -> Result<BatchOutcome> {
        let url = format!("{}/records/batch", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "operations": ops }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WaypointError::Ledger(format!(
                "batch submit returned {}",
                response.status()
            )));
        }

        let outcome = response.json::<BatchOutcome>().await?;
        Ok(outcome)
    }
}

/// HTTP client for the delivery mirror
pub struct HttpDeliveryClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpDeliveryClient {
    pub fn new(base_url: &str, request_timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(request_timeout_ms))
            .build()
            .map_err(|e| WaypointError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn fetch(&self, doc_type: &str, id: &str) -> Result<Option<LedgerRecord>> {
        let url = format!("{}/delivery/{}/{}", self.base_url, doc_type, id);
        let response = self.http.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(WaypointError::TierUnavailable(format!(
                "delivery returned {} for {}",
                response.status(),
                url
            )));
        }

        let record = response.json::<LedgerRecord>().await?;
        Ok(Some(record))
    }
}
