//! Long-term persistence of selected feedback.
//!
//! The outcome store hands batches of [`PersistRecord`]s to a
//! [`FeedbackSink`]. The in-memory store stays authoritative; a sink that
//! fails or stalls only delays persistence.

mod sqlite;

pub use sqlite::{CategoryCount, SqliteFeedbackSink, StoredRecord};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;

/// One feedback entry prepared for the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistRecord {
    /// Human-readable summary of the entry.
    pub content: String,
    /// Relative importance (0.0-1.0); failures rank above successes.
    pub importance: f64,
    /// Structured details: category, success, context, outcome, selection reasons.
    pub metadata: serde_json::Value,
}

/// Destination for persisted feedback batches.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    /// Persist a batch. Returns the number of records written.
    async fn persist(&self, records: Vec<PersistRecord>) -> StorageResult<usize>;
}
