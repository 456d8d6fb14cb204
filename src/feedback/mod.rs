//! Outcome feedback engine.
//!
//! Records what happened after a decision (prediction, classification,
//! retrieval, tool execution), keeps a bounded in-memory log with lifetime
//! counters, feeds confidence calibration, and persists a selected subset in
//! batches.
//!
//! ```text
//! record_outcome ──▶ entries (≤ max, oldest 20% pruned)
//!       │        ──▶ counters / calibration buckets
//!       └──────────▶ pending ──batch full / interval──▶ flush ──▶ FeedbackSink
//! ```

mod flush;
mod store;
mod summary;
mod types;

pub use flush::{
    select_for_persistence, selection_reasons, FlushReport, Flusher, PendingEntry,
    SelectionReason, FAST_LATENCY_MS, FAST_MIN_CONFIDENCE, HIGH_CONFIDENCE, NOVEL_SUCCESS_LIMIT,
};
pub use store::{
    OutcomeStore, OutcomeTables, OUTCOME_TABLE, TREND_MAX_WINDOW, TREND_MIN_ENTRIES,
    TREND_THRESHOLD,
};
pub use summary::{consistency_score, CONSISTENCY_WINDOWS};
pub use types::{
    ActivitySummary, Category, EntryKey, FeedbackContext, FeedbackEntry, Outcome, OutcomeStats,
    PatternSummary, RecentQuery, TimelineEvent, TimelineFilter, CONFIDENCE_KEYS,
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_category_roundtrip() {
        for category in Category::ALL {
            assert_eq!(category.to_string().parse::<Category>().unwrap(), category);
        }
        assert_eq!(
            serde_json::to_string(&Category::ToolExecution).unwrap(),
            "\"tool_execution\""
        );
        assert!("search".parse::<Category>().is_err());
    }

    #[test]
    fn test_context_confidence_sources() {
        assert_eq!(FeedbackContext::new().with_confidence(0.7).confidence(), Some(0.7));
        assert_eq!(
            FeedbackContext::new()
                .with_extra("predictedConfidence", json!(0.4))
                .confidence(),
            Some(0.4)
        );
        assert_eq!(
            FeedbackContext::new().with_extra("score", json!(1.7)).confidence(),
            Some(1.0)
        );
        assert_eq!(
            FeedbackContext::new().with_extra("confidence", json!("high")).confidence(),
            None
        );
    }

    #[test]
    fn test_context_flattened_extras_roundtrip() {
        let context: FeedbackContext = serde_json::from_value(json!({
            "tool": "grep",
            "predicted_confidence": 0.8,
            "query": "rust"
        }))
        .unwrap();

        assert_eq!(context.tool_name(), Some("grep"));
        assert_eq!(context.confidence(), Some(0.8));
        assert_eq!(context.extra["query"], "rust");
    }

    #[test]
    fn test_context_label_and_needs_fallbacks() {
        let context = FeedbackContext::new()
            .with_extra("storeType", json!("episodic"))
            .with_extra("predictedNeeds", json!(["a", 3, "b"]));
        assert_eq!(context.classification_label(), Some("episodic"));
        assert_eq!(context.needs(), vec!["a".to_string(), "b".to_string()]);

        let typed = FeedbackContext::new().with_predicted_needs(["x"]);
        assert_eq!(typed.needs(), vec!["x".to_string()]);
    }

    #[test]
    fn test_entry_describe() {
        let entry = FeedbackEntry {
            id: "e".to_string(),
            key: EntryKey {
                timestamp_ms: 0,
                seq: 0,
            },
            category: Category::ToolExecution,
            context: FeedbackContext::new().with_tool("curl").with_confidence(0.5),
            outcome: Outcome::failure("timeout"),
            success: false,
            recorded_at: chrono::Utc::now(),
        };
        assert_eq!(
            entry.describe(),
            "tool_execution failure [tool: curl] (confidence 0.50): timeout"
        );
    }

    #[test]
    fn test_entry_key_order() {
        let a = EntryKey {
            timestamp_ms: 10,
            seq: 9,
        };
        let b = EntryKey {
            timestamp_ms: 11,
            seq: 0,
        };
        let c = EntryKey {
            timestamp_ms: 11,
            seq: 1,
        };
        assert!(a < b && b < c);
    }
}
