use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::stats::Trend;
use crate::store::CounterSnapshot;

/// Extra-map keys checked, in order, for a predicted confidence.
pub const CONFIDENCE_KEYS: &[&str] = &[
    "predicted_confidence",
    "predictedConfidence",
    "confidence",
    "raw_confidence",
    "score",
];

/// Kind of decision an outcome belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Predictions about what the user will need.
    Prediction,
    /// Classification of incoming content.
    Classification,
    /// Retrieval of stored knowledge.
    Retrieval,
    /// Tool invocations.
    ToolExecution,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Category; 4] = [
        Category::Prediction,
        Category::Classification,
        Category::Retrieval,
        Category::ToolExecution,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Prediction => "prediction",
            Category::Classification => "classification",
            Category::Retrieval => "retrieval",
            Category::ToolExecution => "tool_execution",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prediction" => Ok(Category::Prediction),
            "classification" => Ok(Category::Classification),
            "retrieval" => Ok(Category::Retrieval),
            "tool_execution" | "tool-execution" => Ok(Category::ToolExecution),
            _ => Err(format!("Unknown feedback category: {}", s)),
        }
    }
}

/// What the caller knew when it acted.
///
/// Well-known fields are typed; anything else goes to `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackContext {
    /// Confidence the caller predicted for success (0.0-1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_confidence: Option<f64>,
    /// Tool involved, for tool executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Label assigned by a classifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classified_as: Option<String>,
    /// Store type chosen by a classifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_type: Option<String>,
    /// Needs predicted for the user.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicted_needs: Vec<String>,
    /// Category-specific fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FeedbackContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the predicted confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.predicted_confidence = Some(confidence);
        self
    }

    /// Set the tool name.
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// Set the classifier label.
    pub fn with_classified_as(mut self, label: impl Into<String>) -> Self {
        self.classified_as = Some(label.into());
        self
    }

    /// Set the predicted needs.
    pub fn with_predicted_needs<I, S>(mut self, needs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predicted_needs = needs.into_iter().map(Into::into).collect();
        self
    }

    /// Add an extension field.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Predicted confidence from the typed field or a conventional extra key.
    ///
    /// Values are clamped to [0.0, 1.0]; non-numeric or non-finite values are
    /// skipped.
    pub fn confidence(&self) -> Option<f64> {
        self.predicted_confidence
            .into_iter()
            .chain(
                CONFIDENCE_KEYS
                    .iter()
                    .filter_map(|key| self.extra.get(*key).and_then(Value::as_f64)),
            )
            .find(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0))
    }

    /// Tool name from the typed field or the `tool`/`tool_name` extra keys.
    pub fn tool_name(&self) -> Option<&str> {
        self.tool
            .as_deref()
            .or_else(|| self.extra_str(&["tool", "tool_name", "toolName"]))
    }

    /// Classifier label: `classified_as`, then `store_type`, then extra keys.
    pub fn classification_label(&self) -> Option<&str> {
        self.classified_as
            .as_deref()
            .or(self.store_type.as_deref())
            .or_else(|| self.extra_str(&["classified_as", "classifiedAs", "store_type", "storeType"]))
    }

    /// Predicted needs from the typed field or the extra keys.
    pub fn needs(&self) -> Vec<String> {
        if !self.predicted_needs.is_empty() {
            return self.predicted_needs.clone();
        }
        ["predicted_needs", "predictedNeeds"]
            .iter()
            .filter_map(|key| self.extra.get(*key).and_then(Value::as_array))
            .flat_map(|items| items.iter().filter_map(Value::as_str).map(str::to_string))
            .collect()
    }

    fn extra_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|key| self.extra.get(*key).and_then(Value::as_str))
    }
}

/// What actually happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Whether the action succeeded.
    pub success: bool,
    /// Wall time the action took.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Error description for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Category-specific fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Outcome {
    /// Successful outcome.
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// Failed outcome with an error description.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Outcome from a bare success flag.
    pub fn from_success(success: bool) -> Self {
        Self {
            success,
            ..Default::default()
        }
    }

    /// Set the latency.
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Ordering key of an entry: millisecond timestamp, then insertion sequence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntryKey {
    /// Milliseconds since the Unix epoch, never decreasing across inserts.
    pub timestamp_ms: u64,
    /// Store-wide insertion counter; disambiguates equal timestamps.
    pub seq: u64,
}

/// One recorded outcome. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    /// Unique entry identifier.
    pub id: String,
    /// Store ordering key.
    pub key: EntryKey,
    /// Decision kind.
    pub category: Category,
    /// Caller context.
    pub context: FeedbackContext,
    /// Observed outcome.
    pub outcome: Outcome,
    /// Copy of `outcome.success`.
    pub success: bool,
    /// Wall time of recording.
    pub recorded_at: DateTime<Utc>,
}

impl FeedbackEntry {
    /// One-line description used for persistence and timelines.
    pub fn describe(&self) -> String {
        let verdict = if self.success { "success" } else { "failure" };
        let mut text = format!("{} {}", self.category, verdict);
        if let Some(tool) = self.context.tool_name() {
            text.push_str(&format!(" [tool: {}]", tool));
        }
        if let Some(label) = self.context.classification_label() {
            text.push_str(&format!(" [label: {}]", label));
        }
        if let Some(confidence) = self.context.confidence() {
            text.push_str(&format!(" (confidence {:.2})", confidence));
        }
        if let Some(ref error) = self.outcome.error {
            text.push_str(&format!(": {}", error));
        }
        text
    }
}

/// Success statistics of a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    /// Category described.
    pub category: Category,
    /// Outcomes ever recorded (not reduced by pruning).
    pub total: u64,
    /// Successes over total.
    pub success_rate: f64,
    /// Direction of the recent success rate.
    pub recent_trend: Trend,
}

/// Filter for [`OutcomeStore::get_recent`](super::OutcomeStore::get_recent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentQuery {
    /// Maximum entries returned.
    pub limit: usize,
    /// Only this category.
    #[serde(default)]
    pub category: Option<Category>,
    /// Only entries recorded at or after this time.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

impl Default for RecentQuery {
    fn default() -> Self {
        Self {
            limit: 20,
            category: None,
            since: None,
        }
    }
}

/// Counters and flush bookkeeping of the outcome store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutcomeStats {
    /// Entries currently held in memory.
    pub entries: usize,
    /// Lifetime counters per category.
    pub by_category: BTreeMap<Category, CounterSnapshot>,
    /// Best-effort counters per classifier label / predicted need.
    pub by_type: BTreeMap<Category, BTreeMap<String, CounterSnapshot>>,
    /// Entries waiting for the next flush.
    pub pending_flush: usize,
    /// Records handed to the sink successfully.
    pub persisted_records: u64,
    /// Flushes that failed or timed out.
    pub failed_flushes: u64,
    /// Queued entries evicted because the flush queue was full.
    #[serde(default)]
    pub dropped_pending: u64,
}

/// Activity over one UTC day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    /// Day described.
    pub date: NaiveDate,
    /// Outcomes recorded that day.
    pub total: usize,
    /// Successful outcomes.
    pub successes: usize,
    /// Failed outcomes.
    pub failures: usize,
    /// Successes over total (0 when empty).
    pub success_rate: f64,
    /// Counts per category.
    pub by_category: BTreeMap<Category, CounterSnapshot>,
    /// Counts per tool.
    pub by_tool: BTreeMap<String, CounterSnapshot>,
    /// Longest run of consecutive successes.
    pub longest_success_streak: usize,
    /// `max(0, 1 − 2σ)` of the success rate over five time windows.
    pub consistency_score: f64,
}

/// Filter for [`OutcomeStore::timeline`](super::OutcomeStore::timeline).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineFilter {
    /// Only this category.
    #[serde(default)]
    pub category: Option<Category>,
    /// Only successes (`true`) or failures (`false`).
    #[serde(default)]
    pub success: Option<bool>,
    /// Only this tool.
    #[serde(default)]
    pub tool: Option<String>,
    /// Only entries recorded at or after this time.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One timeline row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Entry identifier.
    pub entry_id: String,
    /// Wall time of recording.
    pub timestamp: DateTime<Utc>,
    /// Decision kind.
    pub category: Category,
    /// Whether it succeeded.
    pub success: bool,
    /// Tool involved, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// One-line description.
    pub summary: String,
}
