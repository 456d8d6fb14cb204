use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};
use uuid::Uuid;

use super::flush::{FlushReport, Flusher, NOVEL_SUCCESS_LIMIT};
use super::summary;
use super::types::{
    ActivitySummary, Category, EntryKey, FeedbackContext, FeedbackEntry, Outcome, OutcomeStats,
    PatternSummary, RecentQuery, TimelineEvent, TimelineFilter,
};
use crate::calibration::CalibrationEngine;
use crate::clock::SharedClock;
use crate::config::FeedbackConfig;
use crate::stats::{self, Trend};
use crate::storage::FeedbackSink;
use crate::store::{Acquired, ConcurrentStore, CounterSnapshot, CounterTable, Heir, OwnedTable};

/// Heir registry name of the outcome tables.
pub const OUTCOME_TABLE: &str = "feedback_outcomes";

/// Minimum entries of a category before a trend is reported.
pub const TREND_MIN_ENTRIES: usize = 20;
/// Upper bound of each trend window.
pub const TREND_MAX_WINDOW: usize = 50;
/// Success-rate difference treated as a real change.
pub const TREND_THRESHOLD: f64 = 0.05;

/// Everything the outcome store keeps in memory; handed to the heir as one unit.
#[derive(Debug, Default)]
pub struct OutcomeTables {
    entries: ConcurrentStore<EntryKey, FeedbackEntry>,
    totals: CounterTable<Category>,
    by_type: CounterTable<(Category, String)>,
    calibration: CalibrationEngine,
    last_timestamp_ms: AtomicU64,
    seq: AtomicU64,
}

impl OutcomeTables {
    /// Next strictly increasing entry key.
    ///
    /// Timestamps never decrease even if wall time steps back; the sequence
    /// breaks ties.
    fn next_key(&self, now_ms: u64) -> EntryKey {
        let previous = self.last_timestamp_ms.fetch_max(now_ms, Ordering::AcqRel);
        EntryKey {
            timestamp_ms: previous.max(now_ms),
            seq: self.seq.fetch_add(1, Ordering::AcqRel),
        }
    }
}

/// Bounded in-memory log of decision outcomes with per-category statistics,
/// calibration data and batched persistence.
///
/// Recording is synchronous and never waits on persistence.
pub struct OutcomeStore {
    tables: OwnedTable<OutcomeTables>,
    flusher: Arc<Flusher>,
    clock: SharedClock,
    config: FeedbackConfig,
}

impl OutcomeStore {
    /// Create a store with fresh tables and no heir.
    pub fn new(
        config: FeedbackConfig,
        clock: SharedClock,
        sink: Option<Arc<dyn FeedbackSink>>,
    ) -> Self {
        Self::with_heir(config, clock, sink, None).0
    }

    /// Create a store, reclaiming the tables held by `heir` when there are any.
    pub fn with_heir(
        config: FeedbackConfig,
        clock: SharedClock,
        sink: Option<Arc<dyn FeedbackSink>>,
        heir: Option<Heir>,
    ) -> (Self, Acquired) {
        let (tables, acquired) = OwnedTable::acquire(OUTCOME_TABLE, heir, OutcomeTables::default);
        if acquired == Acquired::Reclaimed {
            info!(entries = tables.entries.len(), "Outcome store resumed with reclaimed entries");
        }
        let flusher = Arc::new(Flusher::new(config.clone(), sink));
        (
            Self {
                tables,
                flusher,
                clock,
                config,
            },
            acquired,
        )
    }

    /// Entries held in memory.
    pub fn len(&self) -> usize {
        self.tables.entries.len()
    }

    /// Whether no entries are held.
    pub fn is_empty(&self) -> bool {
        self.tables.entries.is_empty()
    }

    /// Calibration data gathered from recorded confidences.
    pub fn calibration(&self) -> &CalibrationEngine {
        &self.tables.calibration
    }

    /// Record an outcome.
    ///
    /// Updates counters and calibration, prunes when over capacity, and
    /// queues the entry for persistence. When the queue reaches the batch
    /// size a background flush is started.
    pub fn record_outcome(
        &self,
        category: Category,
        context: FeedbackContext,
        outcome: Outcome,
    ) -> FeedbackEntry {
        let now = self.clock.now();
        let key = self.tables.next_key(now.timestamp_millis().max(0) as u64);
        let success = outcome.success;

        let entry = FeedbackEntry {
            id: Uuid::new_v4().to_string(),
            key,
            category,
            context,
            outcome,
            success,
            recorded_at: now,
        };
        self.tables.entries.insert(key, entry.clone());

        let totals = self.tables.totals.record(category, success);
        self.count_types(&entry);
        if let Some(confidence) = entry.context.confidence() {
            self.tables.calibration.record(category, confidence, success);
        }

        let pruned = self
            .tables
            .entries
            .prune_if_over(self.config.max_entries, self.config.prune_fraction);
        if pruned > 0 {
            info!(pruned, remaining = self.len(), "Pruned oldest feedback entries");
        }

        debug!(
            entry_id = %entry.id,
            category = %category,
            success,
            "Outcome recorded"
        );

        let novel = success && totals.success <= NOVEL_SUCCESS_LIMIT;
        if self.flusher.enqueue(entry.clone(), novel) {
            self.flusher.trigger();
        }
        entry
    }

    /// Per-type counters: classifier labels and predicted needs.
    fn count_types(&self, entry: &FeedbackEntry) {
        match entry.category {
            Category::Classification => {
                if let Some(label) = entry.context.classification_label() {
                    self.tables
                        .by_type
                        .record((entry.category, label.to_string()), entry.success);
                }
            }
            Category::Prediction => {
                for need in entry.context.needs() {
                    self.tables.by_type.record((entry.category, need), entry.success);
                }
            }
            Category::Retrieval | Category::ToolExecution => {}
        }
    }

    /// Prune now if over capacity. Returns the number of entries removed.
    pub fn prune(&self) -> usize {
        self.tables
            .entries
            .prune_if_over(self.config.max_entries, self.config.prune_fraction)
    }

    /// Success statistics of one category.
    pub fn query_patterns(&self, category: Category) -> PatternSummary {
        let counts = self.tables.totals.get(&category);
        PatternSummary {
            category,
            total: counts.total,
            success_rate: counts.success_rate(),
            recent_trend: self.trend_of(category),
        }
    }

    /// Success statistics of every category with at least one outcome.
    pub fn all_patterns(&self) -> Vec<PatternSummary> {
        Category::ALL
            .iter()
            .filter(|category| self.tables.totals.get(category).total > 0)
            .map(|&category| self.query_patterns(category))
            .collect()
    }

    /// Most recent entries, newest first.
    pub fn get_recent(&self, query: &RecentQuery) -> Vec<FeedbackEntry> {
        self.tables.entries.read(|entries| {
            entries
                .values()
                .rev()
                .filter(|e| query.since.map_or(true, |since| e.recorded_at >= since))
                .filter(|e| query.category.map_or(true, |c| e.category == c))
                .take(query.limit)
                .cloned()
                .collect()
        })
    }

    /// Direction of a category's success rate.
    ///
    /// Compares the latest window against the one before it; windows hold
    /// `min(50, n/2)` entries. Fewer than 20 entries is insufficient data.
    pub fn trend_of(&self, category: Category) -> Trend {
        let outcomes: Vec<bool> = self.tables.entries.read(|entries| {
            entries
                .values()
                .filter(|e| e.category == category)
                .map(|e| e.success)
                .collect()
        });

        let n = outcomes.len();
        if n < TREND_MIN_ENTRIES {
            return Trend::InsufficientData;
        }

        let window = TREND_MAX_WINDOW.min(n / 2);
        let recent = &outcomes[n - window..];
        let previous = &outcomes[n - 2 * window..n - window];

        match (
            stats::success_rate(recent.iter().copied()),
            stats::success_rate(previous.iter().copied()),
        ) {
            (Some(recent), Some(previous)) => Trend::classify(recent, previous, TREND_THRESHOLD),
            _ => Trend::InsufficientData,
        }
    }

    /// Activity summary of one UTC day.
    pub fn daily_activity(&self, date: NaiveDate) -> ActivitySummary {
        self.tables
            .entries
            .read(|entries| summary::daily_activity(date, entries.values()))
    }

    /// Activity summary of the current UTC day.
    pub fn today(&self) -> ActivitySummary {
        self.daily_activity(self.clock.now().date_naive())
    }

    /// Filtered chronological view of the held entries.
    pub fn timeline(&self, filter: &TimelineFilter) -> Vec<TimelineEvent> {
        self.tables
            .entries
            .read(|entries| summary::timeline(filter, entries.values()))
    }

    /// Lifetime counters of one category.
    pub fn counts(&self, category: Category) -> CounterSnapshot {
        self.tables.totals.get(&category)
    }

    /// Counters and flush bookkeeping.
    pub fn stats(&self) -> OutcomeStats {
        let by_category = self.tables.totals.snapshot().into_iter().collect();

        let mut by_type: BTreeMap<Category, BTreeMap<String, CounterSnapshot>> = BTreeMap::new();
        for ((category, name), counts) in self.tables.by_type.snapshot() {
            by_type.entry(category).or_default().insert(name, counts);
        }

        OutcomeStats {
            entries: self.len(),
            by_category,
            by_type,
            pending_flush: self.flusher.pending_len(),
            persisted_records: self.flusher.persisted_records(),
            failed_flushes: self.flusher.failed_flushes(),
            dropped_pending: self.flusher.dropped_pending(),
        }
    }

    /// Persist what is queued now.
    pub async fn flush(&self) -> FlushReport {
        self.flusher.flush().await
    }

    /// Flush machinery, for background tasks.
    pub fn flusher(&self) -> &Arc<Flusher> {
        &self.flusher
    }

    /// Drop all entries, counters, calibration data and queued records.
    pub fn clear(&self) {
        self.tables.entries.clear();
        self.tables.totals.clear();
        self.tables.by_type.clear();
        self.tables.calibration.clear();
        self.flusher.clear();
        info!("Outcome store cleared");
    }
}
