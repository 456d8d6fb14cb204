//! Batched persistence of selected feedback.
//!
//! Every recorded entry is queued. A flush drains the queue, keeps every
//! failure plus a capped sample of valuable successes, and hands them to the
//! [`FeedbackSink`] under a timeout. Records of a failed flush are re-queued
//! for the next attempt.
//!
//! Both buffers hold at most `flush_batch_size × 10` items. A full queue
//! evicts its oldest success first, so failures outlive a missing runtime or
//! a stopped ticker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::types::FeedbackEntry;
use crate::config::FeedbackConfig;
use crate::error::StorageError;
use crate::storage::{FeedbackSink, PersistRecord};

/// Confidence above which a success is always worth keeping.
pub const HIGH_CONFIDENCE: f64 = 0.8;
/// Latency under which a reasonably confident success is worth keeping.
pub const FAST_LATENCY_MS: u64 = 100;
/// Confidence required together with [`FAST_LATENCY_MS`].
pub const FAST_MIN_CONFIDENCE: f64 = 0.6;
/// A success is novel while its category has at most this many successes.
pub const NOVEL_SUCCESS_LIMIT: u64 = 5;

const FAILURE_IMPORTANCE: f64 = 0.8;
const SUCCESS_IMPORTANCE: f64 = 0.5;

/// Entry waiting for the next flush.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    /// Entry as recorded.
    pub entry: FeedbackEntry,
    /// Whether it was among the first successes of its category.
    pub novel: bool,
}

/// Why a success was selected for persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    /// Failures are always kept.
    Failure,
    /// Predicted confidence above [`HIGH_CONFIDENCE`].
    HighConfidence,
    /// Fast and reasonably confident.
    Fast,
    /// Among the first successes of its category.
    Novel,
}

impl SelectionReason {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionReason::Failure => "failure",
            SelectionReason::HighConfidence => "high_confidence",
            SelectionReason::Fast => "fast",
            SelectionReason::Novel => "novel",
        }
    }
}

/// Reasons a pending entry is worth persisting; empty when it is not.
pub fn selection_reasons(pending: &PendingEntry) -> Vec<SelectionReason> {
    if !pending.entry.success {
        return vec![SelectionReason::Failure];
    }

    let confidence = pending.entry.context.confidence();
    let mut reasons = Vec::new();
    if confidence.is_some_and(|c| c > HIGH_CONFIDENCE) {
        reasons.push(SelectionReason::HighConfidence);
    }
    let fast = pending
        .entry
        .outcome
        .latency_ms
        .is_some_and(|ms| ms < FAST_LATENCY_MS);
    if fast && confidence.is_some_and(|c| c > FAST_MIN_CONFIDENCE) {
        reasons.push(SelectionReason::Fast);
    }
    if pending.novel {
        reasons.push(SelectionReason::Novel);
    }
    reasons
}

/// Choose what to persist from a drained batch.
///
/// All failures are kept; valuable successes are kept in recording order up
/// to `success_cap`.
pub fn select_for_persistence(batch: &[PendingEntry], success_cap: usize) -> Vec<PersistRecord> {
    let mut successes = 0;
    let mut records = Vec::new();

    for pending in batch {
        let reasons = selection_reasons(pending);
        if reasons.is_empty() {
            continue;
        }
        if pending.entry.success {
            if successes >= success_cap {
                continue;
            }
            successes += 1;
        }
        records.push(to_record(&pending.entry, &reasons));
    }
    records
}

fn to_record(entry: &FeedbackEntry, reasons: &[SelectionReason]) -> PersistRecord {
    let importance = if entry.success {
        SUCCESS_IMPORTANCE + 0.1 * reasons.len() as f64
    } else {
        FAILURE_IMPORTANCE
    };

    PersistRecord {
        content: entry.describe(),
        importance: importance.min(1.0),
        metadata: json!({
            "entry_id": entry.id,
            "category": entry.category.as_str(),
            "success": entry.success,
            "recorded_at": entry.recorded_at.to_rfc3339(),
            "confidence": entry.context.confidence(),
            "latency_ms": entry.outcome.latency_ms,
            "reasons": reasons.iter().map(SelectionReason::as_str).collect::<Vec<_>>(),
            "context": entry.context,
            "outcome": entry.outcome,
        }),
    }
}

/// Result of one flush attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Entries drained from the queue.
    pub drained: usize,
    /// Records handed to the sink (including retried ones).
    pub attempted: usize,
    /// Records the sink confirmed.
    pub persisted: usize,
    /// Records put back for a later attempt.
    pub requeued: usize,
    /// Another flush was running; nothing was done.
    pub skipped: bool,
}

/// Queue and flush machinery of the outcome store.
pub struct Flusher {
    sink: Option<Arc<dyn FeedbackSink>>,
    config: FeedbackConfig,
    pending: Mutex<VecDeque<PendingEntry>>,
    retry: Mutex<Vec<PersistRecord>>,
    flushing: AtomicBool,
    persisted_records: AtomicU64,
    failed_flushes: AtomicU64,
    dropped_pending: AtomicU64,
}

impl std::fmt::Debug for Flusher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flusher")
            .field("has_sink", &self.sink.is_some())
            .field("pending", &self.pending.lock().len())
            .field("retry", &self.retry.lock().len())
            .finish()
    }
}

struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Flusher {
    /// Create a flusher; without a sink, flushes only drain the queue.
    pub fn new(config: FeedbackConfig, sink: Option<Arc<dyn FeedbackSink>>) -> Self {
        Self {
            sink,
            config,
            pending: Mutex::new(VecDeque::new()),
            retry: Mutex::new(Vec::new()),
            flushing: AtomicBool::new(false),
            persisted_records: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
            dropped_pending: AtomicU64::new(0),
        }
    }

    /// Queue an entry. Returns true when the queue reached the batch size.
    ///
    /// When the queue is full the oldest success is evicted, or the oldest
    /// entry when only failures are queued.
    pub fn enqueue(&self, entry: FeedbackEntry, novel: bool) -> bool {
        let capacity = self.buffer_capacity();
        let mut pending = self.pending.lock();
        pending.push_back(PendingEntry { entry, novel });

        if pending.len() > capacity {
            let victim = pending.iter().position(|p| p.entry.success).unwrap_or(0);
            pending.remove(victim);
            let dropped = self.dropped_pending.fetch_add(1, Ordering::AcqRel) + 1;
            if dropped == 1 || dropped % 1_000 == 0 {
                warn!(capacity, dropped, "Flush queue full, evicting unflushed entries");
            }
        }

        pending.len() >= self.config.flush_batch_size
    }

    /// Entries waiting for a flush.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Records waiting for a retry.
    pub fn retry_len(&self) -> usize {
        self.retry.lock().len()
    }

    /// Records confirmed by the sink so far.
    pub fn persisted_records(&self) -> u64 {
        self.persisted_records.load(Ordering::Acquire)
    }

    /// Flush attempts that failed or timed out.
    pub fn failed_flushes(&self) -> u64 {
        self.failed_flushes.load(Ordering::Acquire)
    }

    /// Queued entries evicted before any flush saw them.
    pub fn dropped_pending(&self) -> u64 {
        self.dropped_pending.load(Ordering::Acquire)
    }

    /// Drop everything queued.
    pub fn clear(&self) {
        self.pending.lock().clear();
        self.retry.lock().clear();
    }

    /// Flush in the background when called inside a Tokio runtime.
    ///
    /// Outside a runtime the batch waits for the next scheduled flush.
    pub fn trigger(self: &Arc<Self>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let flusher = Arc::clone(self);
                handle.spawn(async move {
                    flusher.flush().await;
                });
            }
            Err(_) => {
                debug!("No async runtime, batch left for the scheduled flush");
            }
        }
    }

    /// Drain the queue and persist the selected records.
    ///
    /// Concurrent calls do not double-drain: while one flush runs, others
    /// return a skipped report.
    pub async fn flush(&self) -> FlushReport {
        if self.flushing.swap(true, Ordering::AcqRel) {
            debug!("Flush already running, skipping");
            return FlushReport {
                skipped: true,
                ..Default::default()
            };
        }
        let _guard = FlushGuard(&self.flushing);

        let batch = Vec::from(std::mem::take(&mut *self.pending.lock()));
        let drained = batch.len();

        let Some(sink) = self.sink.clone() else {
            if drained > 0 {
                debug!(drained, "No feedback sink configured, dropping batch");
            }
            return FlushReport {
                drained,
                ..Default::default()
            };
        };

        let mut records = std::mem::take(&mut *self.retry.lock());
        let retried = records.len();
        records.extend(select_for_persistence(&batch, self.config.success_sample_cap()));

        if records.is_empty() {
            return FlushReport {
                drained,
                ..Default::default()
            };
        }

        let attempted = records.len();
        let timeout_ms = self.config.collaborator_timeout_ms;
        let started = Instant::now();
        debug!(drained, attempted, retried, "Flushing feedback batch");

        let result = match tokio::time::timeout(
            self.config.collaborator_timeout(),
            sink.persist(records.clone()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout { timeout_ms }),
        };

        match result {
            Ok(persisted) => {
                self.persisted_records
                    .fetch_add(persisted as u64, Ordering::AcqRel);
                info!(
                    drained,
                    persisted,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Feedback batch persisted"
                );
                FlushReport {
                    drained,
                    attempted,
                    persisted,
                    requeued: 0,
                    skipped: false,
                }
            }
            Err(e) => {
                self.failed_flushes.fetch_add(1, Ordering::AcqRel);
                let requeued = self.requeue(records);
                warn!(error = %e, attempted, requeued, "Feedback persistence failed, batch re-queued");
                FlushReport {
                    drained,
                    attempted,
                    persisted: 0,
                    requeued,
                    skipped: false,
                }
            }
        }
    }

    /// Put records back for the next flush, keeping the newest when over the bound.
    fn requeue(&self, records: Vec<PersistRecord>) -> usize {
        let capacity = self.buffer_capacity();
        let mut retry = self.retry.lock();
        retry.extend(records);
        if retry.len() > capacity {
            let overflow = retry.len() - capacity;
            retry.drain(..overflow);
            warn!(dropped = overflow, "Retry buffer full, dropped oldest records");
        }
        retry.len()
    }

    fn buffer_capacity(&self) -> usize {
        self.config.flush_batch_size.saturating_mul(10).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::types::{Category, EntryKey, FeedbackContext, Outcome};
    use crate::storage::MockFeedbackSink;
    use chrono::Utc;

    fn entry(seq: u64, success: bool, confidence: Option<f64>, latency_ms: Option<u64>) -> FeedbackEntry {
        let mut context = FeedbackContext::new();
        context.predicted_confidence = confidence;
        let mut outcome = if success {
            Outcome::success()
        } else {
            Outcome::failure("boom")
        };
        outcome.latency_ms = latency_ms;
        FeedbackEntry {
            id: format!("e{}", seq),
            key: EntryKey {
                timestamp_ms: 1_000,
                seq,
            },
            category: Category::ToolExecution,
            context,
            outcome,
            success,
            recorded_at: Utc::now(),
        }
    }

    fn pending(entry: FeedbackEntry, novel: bool) -> PendingEntry {
        PendingEntry { entry, novel }
    }

    fn config(batch: usize) -> FeedbackConfig {
        FeedbackConfig {
            flush_batch_size: batch,
            collaborator_timeout_ms: 50,
            ..Default::default()
        }
    }

    #[test]
    fn test_selection_reasons() {
        assert_eq!(
            selection_reasons(&pending(entry(1, false, None, None), false)),
            vec![SelectionReason::Failure]
        );
        assert_eq!(
            selection_reasons(&pending(entry(2, true, Some(0.9), None), false)),
            vec![SelectionReason::HighConfidence]
        );
        assert_eq!(
            selection_reasons(&pending(entry(3, true, Some(0.7), Some(50)), false)),
            vec![SelectionReason::Fast]
        );
        // Fast but not confident enough
        assert!(selection_reasons(&pending(entry(4, true, Some(0.5), Some(50)), false)).is_empty());
        assert_eq!(
            selection_reasons(&pending(entry(5, true, None, None), true)),
            vec![SelectionReason::Novel]
        );
    }

    #[test]
    fn test_select_keeps_all_failures_and_caps_successes() {
        let mut batch: Vec<_> = (0..30)
            .map(|i| pending(entry(i, true, Some(0.95), None), false))
            .collect();
        batch.extend((30..37).map(|i| pending(entry(i, false, None, None), false)));
        batch.push(pending(entry(40, true, Some(0.2), None), false));

        let records = select_for_persistence(&batch, 10);
        let failures = records.iter().filter(|r| r.metadata["success"] == false).count();
        let successes = records.iter().filter(|r| r.metadata["success"] == true).count();

        assert_eq!(failures, 7);
        assert_eq!(successes, 10);
        // Earliest successes win the cap
        assert_eq!(records[0].metadata["entry_id"], "e0");
    }

    #[test]
    fn test_record_importance() {
        let failure = to_record(&entry(1, false, None, None), &[SelectionReason::Failure]);
        let success = to_record(
            &entry(2, true, Some(0.9), None),
            &[SelectionReason::HighConfidence],
        );
        assert!(failure.importance > success.importance);
        assert_eq!(failure.metadata["category"], "tool_execution");
        assert!(failure.content.contains("failure"));
    }

    #[test]
    fn test_enqueue_reports_full_batch() {
        let flusher = Flusher::new(config(2), None);
        assert!(!flusher.enqueue(entry(1, true, None, None), false));
        assert!(flusher.enqueue(entry(2, true, None, None), false));
        assert_eq!(flusher.pending_len(), 2);
    }

    #[test]
    fn test_full_queue_evicts_successes_before_failures() {
        // Capacity 20
        let flusher = Flusher::new(config(2), None);
        for i in 0..5 {
            flusher.enqueue(entry(i, false, None, None), false);
        }
        for i in 5..1_000 {
            flusher.enqueue(entry(i, true, Some(0.9), None), false);
        }

        assert_eq!(flusher.pending_len(), 20);
        assert_eq!(flusher.dropped_pending(), 980);
        let pending = flusher.pending.lock();
        assert_eq!(pending.iter().filter(|p| !p.entry.success).count(), 5);
        assert_eq!(pending.back().map(|p| p.entry.id.as_str()), Some("e999"));
    }

    #[test]
    fn test_full_queue_of_failures_drops_oldest() {
        let flusher = Flusher::new(config(1), None);
        for i in 0..15 {
            flusher.enqueue(entry(i, false, None, None), false);
        }

        assert_eq!(flusher.pending_len(), 10);
        assert_eq!(flusher.dropped_pending(), 5);
        assert_eq!(flusher.pending.lock()[0].entry.id, "e5");
    }

    #[tokio::test]
    async fn test_flush_without_sink_drains() {
        let flusher = Flusher::new(config(10), None);
        flusher.enqueue(entry(1, false, None, None), false);

        let report = flusher.flush().await;
        assert_eq!(report.drained, 1);
        assert_eq!(report.persisted, 0);
        assert_eq!(flusher.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_flush_persists_selection() {
        let mut sink = MockFeedbackSink::new();
        sink.expect_persist()
            .times(1)
            .withf(|records| records.len() == 2)
            .returning(|records| Ok(records.len()));

        let flusher = Flusher::new(config(10), Some(Arc::new(sink)));
        flusher.enqueue(entry(1, false, None, None), false);
        flusher.enqueue(entry(2, true, Some(0.3), None), false);
        flusher.enqueue(entry(3, true, Some(0.9), None), false);

        let report = flusher.flush().await;
        assert_eq!(report.drained, 3);
        assert_eq!(report.persisted, 2);
        assert_eq!(flusher.persisted_records(), 2);
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_then_retries() {
        let mut sink = MockFeedbackSink::new();
        let mut seq = mockall::Sequence::new();
        sink.expect_persist()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(StorageError::Query {
                    message: "disk full".to_string(),
                })
            });
        sink.expect_persist()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|records| records.len() == 2)
            .returning(|records| Ok(records.len()));

        let flusher = Flusher::new(config(10), Some(Arc::new(sink)));
        flusher.enqueue(entry(1, false, None, None), false);

        let report = flusher.flush().await;
        assert_eq!(report.requeued, 1);
        assert_eq!(flusher.retry_len(), 1);
        assert_eq!(flusher.failed_flushes(), 1);

        flusher.enqueue(entry(2, false, None, None), false);
        let report = flusher.flush().await;
        assert_eq!(report.persisted, 2);
        assert_eq!(flusher.retry_len(), 0);
    }

    struct StalledSink;

    #[async_trait::async_trait]
    impl FeedbackSink for StalledSink {
        async fn persist(&self, _records: Vec<PersistRecord>) -> crate::error::StorageResult<usize> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sink_times_out() {
        let flusher = Flusher::new(config(10), Some(Arc::new(StalledSink)));
        flusher.enqueue(entry(1, false, None, None), false);

        let report = flusher.flush().await;
        assert_eq!(report.persisted, 0);
        assert_eq!(report.requeued, 1);
        assert_eq!(flusher.failed_flushes(), 1);
    }

    #[test]
    fn test_requeue_is_bounded() {
        let flusher = Flusher::new(config(1), None);
        let records: Vec<_> = (0..25)
            .map(|i| PersistRecord {
                content: format!("r{}", i),
                importance: 0.8,
                metadata: json!({}),
            })
            .collect();

        assert_eq!(flusher.requeue(records), 10);
        assert_eq!(flusher.retry.lock()[0].content, "r15");
    }
}
