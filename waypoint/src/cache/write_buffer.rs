//! Write buffer with backpressure protection
//!
//! Protects the ledger from write storms by:
//! - Batching writes by priority (high drains before normal, normal before bulk)
//! - Deduplicating writes (last-write-wins per document, across priorities)
//! - Signaling backpressure when the buffer is full
//! - Auto-flushing from a background task with per-operation retry budgets

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ledger::LedgerClient;
use crate::projection::ProjectionStore;
use crate::types::{Result, WaypointError};

/// Write operation priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WritePriority {
    /// High priority - identity/settings operations, flush first
    High = 0,
    /// Normal priority - regular content
    Normal = 1,
    /// Bulk priority - imports and recovery sync
    Bulk = 2,
}

impl WritePriority {
    pub const ALL: [WritePriority; 3] = [Self::High, Self::Normal, Self::Bulk];

    fn index(self) -> usize {
        self as usize
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "bulk" => Some(Self::Bulk),
            _ => None,
        }
    }
}

impl Default for WritePriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// A single write operation in the buffer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteOp {
    /// Operation ID, assigned at enqueue and stable across retries
    pub id: Uuid,
    /// Document type (e.g., "Content", "Path")
    pub doc_type: String,
    /// Document ID
    pub doc_id: String,
    /// The data to write (JSON)
    pub data: JsonValue,
    /// Priority level
    pub priority: WritePriority,
    /// Timestamp when queued (ms since epoch)
    pub queued_at: u64,
    /// Delivery attempts so far
    #[serde(skip)]
    pub attempts: u32,
    /// Per-operation retry budget; None uses the buffer default
    #[serde(skip)]
    pub max_retries: Option<u32>,
}

impl WriteOp {
    pub fn new(
        doc_type: impl Into<String>,
        doc_id: impl Into<String>,
        data: JsonValue,
        priority: WritePriority,
        max_retries: Option<u32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            doc_type: doc_type.into(),
            doc_id: doc_id.into(),
            data,
            priority,
            queued_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            attempts: 0,
            max_retries,
        }
    }

    /// Deduplication key: "{doc_type}:{doc_id}"
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.doc_type, self.doc_id)
    }
}

/// Configuration for the write buffer
#[derive(Debug, Clone)]
pub struct WriteBufferConfig {
    /// Maximum operations in buffer before rejecting new writes
    pub max_size: usize,
    /// High watermark for backpressure signaling (0-100)
    pub high_watermark: u8,
    /// Batch size for flush operations
    pub batch_size: usize,
    /// Auto-flush interval in milliseconds
    pub auto_flush_ms: u64,
    /// Retry budget per operation
    pub max_retries: u32,
    /// Base retry delay; doubles per attempt
    pub retry_base_ms: u64,
    /// Retry delay cap
    pub retry_max_ms: u64,
}

impl Default for WriteBufferConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            high_watermark: 80,
            batch_size: 50,
            auto_flush_ms: 1000,
            max_retries: 5,
            retry_base_ms: 100,
            retry_max_ms: 30_000,
        }
    }
}

impl WriteBufferConfig {
    /// Interactive editing: small batches, fast flush, short retries
    pub fn for_interactive() -> Self {
        Self {
            max_size: 100,
            high_watermark: 50,
            batch_size: 10,
            auto_flush_ms: 100,
            max_retries: 5,
            retry_base_ms: 100,
            retry_max_ms: 5_000,
        }
    }

    /// Bulk import: large batches, aggressive batching, patient retries
    pub fn for_bulk_import() -> Self {
        Self {
            max_size: 5000,
            high_watermark: 90,
            batch_size: 500,
            auto_flush_ms: 5000,
            max_retries: 8,
            retry_base_ms: 500,
            retry_max_ms: 60_000,
        }
    }

    /// Recovery sync: moderate batches, the longest retry budget
    pub fn for_recovery_sync() -> Self {
        Self {
            max_size: 2000,
            high_watermark: 75,
            batch_size: 100,
            auto_flush_ms: 2000,
            max_retries: 12,
            retry_base_ms: 250,
            retry_max_ms: 30_000,
        }
    }
}

/// Aggregate write buffer counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct WriteStats {
    pub pending: usize,
    pub backpressure: u8,
    pub queued_total: u64,
    pub flushed_total: u64,
    pub retried_total: u64,
    pub failed_total: u64,
}

/// A write whose retry budget ran out. Delivered on the failure channel
/// so callers can surface the loss instead of silently dropping it.
#[derive(Debug, Clone, Serialize)]
pub struct WriteFailure {
    pub operation_id: Uuid,
    pub doc_type: String,
    pub doc_id: String,
    pub attempts: u32,
    pub error: String,
}

/// Write buffer with priority queues and backpressure
pub struct WriteBuffer {
    config: WriteBufferConfig,
    /// One dedup map per priority, indexed by `WritePriority::index()`
    queues: Mutex<[HashMap<String, WriteOp>; 3]>,
    queued_total: AtomicU64,
    flushed_total: AtomicU64,
    retried_total: AtomicU64,
    failed_total: AtomicU64,
}

impl WriteBuffer {
    pub fn new(config: WriteBufferConfig) -> Self {
        Self {
            config,
            queues: Mutex::new([HashMap::new(), HashMap::new(), HashMap::new()]),
            queued_total: AtomicU64::new(0),
            flushed_total: AtomicU64::new(0),
            retried_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
        }
    }

    /// Queue a write operation.
    ///
    /// Deduplication is buffer-wide: a pending write for the same document
    /// is replaced (last-write-wins), even across priority tiers. A full
    /// buffer rejects the write with the current saturation level.
    /// `max_retries` overrides the buffer's retry budget for this one
    /// operation.
    pub async fn enqueue(
        &self,
        doc_type: impl Into<String>,
        doc_id: impl Into<String>,
        data: JsonValue,
        priority: WritePriority,
        max_retries: Option<u32>,
    ) -> Result<Uuid> {
        let op = WriteOp::new(doc_type, doc_id, data, priority, max_retries);
        let key = op.cache_key();
        let id = op.id;

        let mut queues = self.queues.lock().await;
        let displaced = queues.iter_mut().any(|q| q.remove(&key).is_some());

        if !displaced {
            let total: usize = queues.iter().map(|q| q.len()).sum();
            if total >= self.config.max_size {
                return Err(WaypointError::CapacityExceeded {
                    saturation: Self::saturation_of(total, self.config.max_size),
                });
            }
        }

        queues[priority.index()].insert(key, op);
        self.queued_total.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    /// Put a retried operation back, keeping its id and attempt count.
    /// Capacity is not enforced here; a retry must not be dropped for
    /// competing with fresh writes. Anything pending for the same document
    /// was enqueued after this op left with its batch, so the pending
    /// write wins and the stale retry is discarded (last write wins).
    pub(crate) async fn requeue(&self, op: WriteOp) {
        let mut queues = self.queues.lock().await;
        let key = op.cache_key();
        if queues.iter().any(|q| q.contains_key(&key)) {
            debug!(operation_id = %op.id, key = key, "Retry superseded by a newer write");
            return;
        }
        queues[op.priority.index()].insert(key, op);
    }

    /// Current backpressure level (0-100)
    pub async fn backpressure(&self) -> u8 {
        let queues = self.queues.lock().await;
        let total: usize = queues.iter().map(|q| q.len()).sum();
        Self::saturation_of(total, self.config.max_size)
    }

    /// Whether the buffer is above its high watermark
    pub async fn should_flush(&self) -> bool {
        self.backpressure().await >= self.config.high_watermark
    }

    /// Pending operation counts by priority
    pub async fn pending_counts(&self) -> HashMap<WritePriority, usize> {
        let queues = self.queues.lock().await;
        WritePriority::ALL
            .iter()
            .map(|p| (*p, queues[p.index()].len()))
            .collect()
    }

    /// Take a batch for flushing, draining strictly by priority: every
    /// pending high op leaves before any normal op, and every normal op
    /// before any bulk op.
    pub async fn take_batch(&self) -> Vec<WriteOp> {
        let mut queues = self.queues.lock().await;
        let mut batch = Vec::new();

        for priority in WritePriority::ALL {
            let queue = &mut queues[priority.index()];
            let remaining = self.config.batch_size - batch.len();
            let keys: Vec<String> = queue.keys().take(remaining).cloned().collect();
            for key in keys {
                if let Some(op) = queue.remove(&key) {
                    batch.push(op);
                }
            }
            if batch.len() >= self.config.batch_size {
                break;
            }
        }

        batch
    }

    pub async fn len(&self) -> usize {
        let queues = self.queues.lock().await;
        queues.iter().map(|q| q.len()).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> WriteStats {
        let pending = self.len().await;
        WriteStats {
            pending,
            backpressure: Self::saturation_of(pending, self.config.max_size),
            queued_total: self.queued_total.load(Ordering::Relaxed),
            flushed_total: self.flushed_total.load(Ordering::Relaxed),
            retried_total: self.retried_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &WriteBufferConfig {
        &self.config
    }

    fn saturation_of(total: usize, max: usize) -> u8 {
        if max == 0 {
            return 100;
        }
        ((total as f64 / max as f64 * 100.0) as u8).min(100)
    }
}

/// Handle to the background flush task
pub struct FlushHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<()>,
    /// Writes that exhausted their retry budget
    pub failures: mpsc::Receiver<WriteFailure>,
}

impl FlushHandle {
    /// Signal shutdown and wait for the final drain to complete.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

/// Start the background flush task.
///
/// The task wakes on the auto-flush interval, drains batches in strict
/// priority order, and submits them to the ledger. Accepted writes
/// invalidate their projection so the next read re-fetches the committed
/// version. Failed writes are retried with exponential backoff up to the
/// per-operation budget, then reported on the failure channel.
pub fn start_flush_task(
    buffer: Arc<WriteBuffer>,
    ledger: Arc<dyn LedgerClient>,
    projection: Arc<ProjectionStore>,
) -> FlushHandle {
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let (failure_tx, failures) = mpsc::channel(256);

    let task = tokio::spawn({
        let buffer = Arc::clone(&buffer);
        async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(buffer.config.auto_flush_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!(
                batch_size = buffer.config.batch_size,
                auto_flush_ms = buffer.config.auto_flush_ms,
                "Write flush task started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        // Final drain: one submit attempt per remaining batch
                        while !buffer.is_empty().await {
                            flush_once(&buffer, &ledger, &projection, &failure_tx, true).await;
                        }
                        info!("Write flush task stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        flush_once(&buffer, &ledger, &projection, &failure_tx, false).await;
                    }
                }
            }
        }
    });

    FlushHandle {
        shutdown_tx,
        task,
        failures,
    }
}

async fn flush_once(
    buffer: &Arc<WriteBuffer>,
    ledger: &Arc<dyn LedgerClient>,
    projection: &Arc<ProjectionStore>,
    failure_tx: &mpsc::Sender<WriteFailure>,
    draining: bool,
) {
    let batch = buffer.take_batch().await;
    if batch.is_empty() {
        return;
    }

    debug!(count = batch.len(), "Flushing write batch");

    match ledger.submit_batch(&batch).await {
        Ok(outcome) => {
            let failed: HashMap<Uuid, String> = outcome
                .failed
                .iter()
                .map(|f| (f.operation_id, f.reason.clone()))
                .collect();

            for op in batch {
                match failed.get(&op.id) {
                    Some(reason) => {
                        handle_retry(buffer, failure_tx, op, reason.clone(), draining).await;
                    }
                    None => {
                        projection.invalidate(&op.cache_key());
                        buffer.flushed_total.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "Batch submit failed, retrying operations");
            let reason = e.to_string();
            for op in batch {
                handle_retry(buffer, failure_tx, op, reason.clone(), draining).await;
            }
        }
    }
}

async fn handle_retry(
    buffer: &Arc<WriteBuffer>,
    failure_tx: &mpsc::Sender<WriteFailure>,
    mut op: WriteOp,
    reason: String,
    draining: bool,
) {
    op.attempts += 1;
    let budget = op.max_retries.unwrap_or(buffer.config.max_retries);

    if draining || op.attempts > budget {
        buffer.failed_total.fetch_add(1, Ordering::Relaxed);
        let cause = WaypointError::RetryExhausted {
            operation_id: op.id,
            cause: reason,
        };
        error!(
            doc_type = op.doc_type,
            doc_id = op.doc_id,
            attempts = op.attempts,
            error = %cause,
            "Write dropped after exhausting retries"
        );
        let _ = failure_tx
            .send(WriteFailure {
                operation_id: op.id,
                doc_type: op.doc_type,
                doc_id: op.doc_id,
                attempts: op.attempts,
                error: cause.to_string(),
            })
            .await;
        return;
    }

    buffer.retried_total.fetch_add(1, Ordering::Relaxed);
    let delay = backoff_delay(&buffer.config, op.attempts);
    debug!(
        operation_id = %op.id,
        attempt = op.attempts,
        delay_ms = delay.as_millis() as u64,
        "Scheduling write retry"
    );

    let buffer = Arc::clone(buffer);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        buffer.requeue(op).await;
    });
}

/// Exponential backoff with jitter: base * 2^(attempt-1), capped, plus up
/// to half the base of random jitter to spread retry bursts.
fn backoff_delay(config: &WriteBufferConfig, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(20);
    let exp = config.retry_base_ms.saturating_mul(1u64 << shift);
    let capped = exp.min(config.retry_max_ms);
    let jitter = rand::thread_rng().gen_range(0..=config.retry_base_ms / 2);
    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BatchOutcome, FailedOp, LedgerRecord};
    use crate::projection::{ProjectedDocument, ProjectionConfig};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    struct MockLedger {
        submits: AtomicUsize,
        fail_all: bool,
        fail_ids: std::sync::Mutex<HashSet<Uuid>>,
    }

    impl MockLedger {
        fn accepting() -> Self {
            Self {
                submits: AtomicUsize::new(0),
                fail_all: false,
                fail_ids: std::sync::Mutex::new(HashSet::new()),
            }
        }

        fn rejecting() -> Self {
            Self {
                fail_all: true,
                ..Self::accepting()
            }
        }
    }

    #[async_trait]
    impl LedgerClient for MockLedger {
        async fn fetch(&self, _doc_type: &str, _id: &str) -> Result<Option<LedgerRecord>> {
            Ok(None)
        }

        async fn query(
            &self,
            _doc_type: &str,
            _raw_query: Option<&str>,
        ) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Array(vec![]))
        }

        async fn submit_batch(&self, ops: &[WriteOp]) -> Result<BatchOutcome> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            if self.fail_all {
                return Err(WaypointError::Ledger("ledger down".into()));
            }
            let fail_ids = self.fail_ids.lock().unwrap();
            let failed: Vec<FailedOp> = ops
                .iter()
                .filter(|op| fail_ids.contains(&op.id))
                .map(|op| FailedOp {
                    operation_id: op.id,
                    reason: "version conflict".into(),
                })
                .collect();
            Ok(BatchOutcome {
                accepted: ops.len() - failed.len(),
                failed,
            })
        }
    }

    fn projection() -> Arc<ProjectionStore> {
        Arc::new(ProjectionStore::new(ProjectionConfig::default()))
    }

    #[tokio::test]
    async fn dedup_is_last_write_wins_across_priorities() {
        let buffer = WriteBuffer::new(WriteBufferConfig::default());

        buffer
            .enqueue("Content", "id1", serde_json::json!({"v": 1}), WritePriority::Bulk, None)
            .await
            .unwrap();
        buffer
            .enqueue("Content", "id1", serde_json::json!({"v": 2}), WritePriority::High, None)
            .await
            .unwrap();

        assert_eq!(buffer.len().await, 1);
        let batch = buffer.take_batch().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].data["v"], 2);
        assert_eq!(batch[0].priority, WritePriority::High);
    }

    #[tokio::test]
    async fn take_batch_drains_strictly_by_priority() {
        let buffer = WriteBuffer::new(WriteBufferConfig::default());

        for i in 0..3 {
            buffer
                .enqueue("Content", format!("bulk{i}"), serde_json::json!({}), WritePriority::Bulk, None)
                .await
                .unwrap();
        }
        for i in 0..2 {
            buffer
                .enqueue("Content", format!("normal{i}"), serde_json::json!({}), WritePriority::Normal, None)
                .await
                .unwrap();
        }
        buffer
            .enqueue("Settings", "urgent", serde_json::json!({}), WritePriority::High, None)
            .await
            .unwrap();

        let batch = buffer.take_batch().await;
        assert_eq!(batch.len(), 6);
        assert_eq!(batch[0].priority, WritePriority::High);
        assert_eq!(batch[0].doc_id, "urgent");
        assert!(batch[1..3].iter().all(|op| op.priority == WritePriority::Normal));
        assert!(batch[3..].iter().all(|op| op.priority == WritePriority::Bulk));
    }

    #[tokio::test]
    async fn full_buffer_rejects_with_saturation() {
        let buffer = WriteBuffer::new(WriteBufferConfig {
            max_size: 2,
            ..WriteBufferConfig::default()
        });

        buffer
            .enqueue("C", "a", serde_json::json!({}), WritePriority::Normal, None)
            .await
            .unwrap();
        buffer
            .enqueue("C", "b", serde_json::json!({}), WritePriority::Normal, None)
            .await
            .unwrap();

        let err = buffer
            .enqueue("C", "c", serde_json::json!({}), WritePriority::Normal, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WaypointError::CapacityExceeded { saturation: 100 }));

        // Re-writing a pending document is not a new slot and must succeed.
        buffer
            .enqueue("C", "a", serde_json::json!({"v": 2}), WritePriority::Normal, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retry_never_clobbers_a_newer_write() {
        let buffer = WriteBuffer::new(WriteBufferConfig::default());

        buffer
            .enqueue("Content", "doc", serde_json::json!({"v": 1}), WritePriority::Normal, None)
            .await
            .unwrap();
        let mut batch = buffer.take_batch().await;
        let in_flight = batch.pop().expect("one op in flight");

        // Client writes again while the first attempt is out with its batch
        buffer
            .enqueue("Content", "doc", serde_json::json!({"v": 2}), WritePriority::Normal, None)
            .await
            .unwrap();

        buffer.requeue(in_flight).await;

        let batch = buffer.take_batch().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].data["v"], 2);
    }

    #[tokio::test]
    async fn backpressure_tracks_fill_level() {
        let buffer = WriteBuffer::new(WriteBufferConfig {
            max_size: 10,
            high_watermark: 50,
            ..WriteBufferConfig::default()
        });

        for i in 0..5 {
            buffer
                .enqueue("C", format!("id{i}"), serde_json::json!({}), WritePriority::Normal, None)
                .await
                .unwrap();
        }

        assert_eq!(buffer.backpressure().await, 50);
        assert!(buffer.should_flush().await);
    }

    #[tokio::test]
    async fn flush_invalidates_projection_on_success() {
        let buffer = Arc::new(WriteBuffer::new(WriteBufferConfig {
            auto_flush_ms: 10,
            ..WriteBufferConfig::default()
        }));
        let ledger = Arc::new(MockLedger::accepting());
        let store = projection();

        // Stale projection for the document being written
        store.set(
            ProjectedDocument::new("Content", "manifesto", serde_json::json!({"v": 1})),
            None,
        );

        let handle = start_flush_task(
            Arc::clone(&buffer),
            Arc::clone(&ledger) as Arc<dyn LedgerClient>,
            Arc::clone(&store),
        );

        buffer
            .enqueue("Content", "manifesto", serde_json::json!({"v": 2}), WritePriority::Normal, None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(store.get("Content", "manifesto").is_none());
        let stats = buffer.stats().await;
        assert_eq!(stats.flushed_total, 1);
        assert_eq!(stats.pending, 0);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn exhausted_retries_surface_on_failure_channel() {
        let buffer = Arc::new(WriteBuffer::new(WriteBufferConfig {
            auto_flush_ms: 10,
            max_retries: 2,
            retry_base_ms: 1,
            retry_max_ms: 5,
            ..WriteBufferConfig::default()
        }));
        let ledger = Arc::new(MockLedger::rejecting());
        let store = projection();

        let mut handle = start_flush_task(
            Arc::clone(&buffer),
            Arc::clone(&ledger) as Arc<dyn LedgerClient>,
            store,
        );

        let op_id = buffer
            .enqueue("Content", "doomed", serde_json::json!({}), WritePriority::High, None)
            .await
            .unwrap();

        let failure = tokio::time::timeout(Duration::from_secs(5), handle.failures.recv())
            .await
            .expect("failure report in time")
            .expect("failure channel open");

        assert_eq!(failure.operation_id, op_id);
        assert_eq!(failure.doc_id, "doomed");
        assert_eq!(failure.attempts, 3);
        assert!(failure.error.contains("exhausted its retries"));
        assert_eq!(buffer.stats().await.failed_total, 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn per_op_failures_retry_while_rest_commit() {
        let buffer = Arc::new(WriteBuffer::new(WriteBufferConfig {
            auto_flush_ms: 10,
            max_retries: 1,
            retry_base_ms: 1,
            retry_max_ms: 5,
            ..WriteBufferConfig::default()
        }));
        let ledger = Arc::new(MockLedger::accepting());
        let store = projection();

        let mut handle = start_flush_task(
            Arc::clone(&buffer),
            Arc::clone(&ledger) as Arc<dyn LedgerClient>,
            store,
        );

        let ok_id = buffer
            .enqueue("Content", "fine", serde_json::json!({}), WritePriority::Normal, None)
            .await
            .unwrap();
        let bad_id = buffer
            .enqueue("Content", "conflicted", serde_json::json!({}), WritePriority::Normal, None)
            .await
            .unwrap();
        ledger.fail_ids.lock().unwrap().insert(bad_id);

        let failure = tokio::time::timeout(Duration::from_secs(5), handle.failures.recv())
            .await
            .expect("failure report in time")
            .expect("failure channel open");

        assert_eq!(failure.operation_id, bad_id);
        assert_ne!(failure.operation_id, ok_id);
        let stats = buffer.stats().await;
        assert_eq!(stats.flushed_total, 1);
        assert_eq!(stats.failed_total, 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn per_op_retry_budget_overrides_the_default() {
        let buffer = Arc::new(WriteBuffer::new(WriteBufferConfig {
            auto_flush_ms: 10,
            max_retries: 10,
            retry_base_ms: 1,
            retry_max_ms: 5,
            ..WriteBufferConfig::default()
        }));
        let ledger = Arc::new(MockLedger::rejecting());
        let store = projection();

        let mut handle = start_flush_task(
            Arc::clone(&buffer),
            Arc::clone(&ledger) as Arc<dyn LedgerClient>,
            store,
        );

        // Budget of zero: the first failed attempt is final, despite the
        // buffer default of 10 retries.
        let op_id = buffer
            .enqueue("Content", "one-shot", serde_json::json!({}), WritePriority::Normal, Some(0))
            .await
            .unwrap();

        let failure = tokio::time::timeout(Duration::from_secs(5), handle.failures.recv())
            .await
            .expect("failure report in time")
            .expect("failure channel open");

        assert_eq!(failure.operation_id, op_id);
        assert_eq!(failure.attempts, 1);

        handle.shutdown().await;
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = WriteBufferConfig {
            retry_base_ms: 100,
            retry_max_ms: 1_000,
            ..WriteBufferConfig::default()
        };

        // Jitter adds at most retry_base_ms / 2
        assert!(backoff_delay(&config, 1).as_millis() >= 100);
        assert!(backoff_delay(&config, 1).as_millis() <= 150);
        assert!(backoff_delay(&config, 3).as_millis() >= 400);
        assert!(backoff_delay(&config, 30).as_millis() <= 1_050);
    }

    #[test]
    fn priority_parses_from_query_values() {
        assert_eq!(WritePriority::parse("high"), Some(WritePriority::High));
        assert_eq!(WritePriority::parse("bulk"), Some(WritePriority::Bulk));
        assert_eq!(WritePriority::parse("urgent"), None);
    }
}
