//! Engine bundle shared by callers and background tasks.

use std::sync::Arc;

use tracing::info;

use crate::clock::SharedClock;
use crate::config::Config;
use crate::feedback::{Category, OutcomeStore};
use crate::maintenance::{spawn_maintenance, MaintenanceHandle};
use crate::session::SessionStore;
use crate::storage::FeedbackSink;
use crate::store::{Acquired, Heir};

/// Session and outcome engines with their configuration.
pub struct CoreState {
    /// Application configuration.
    pub config: Config,
    /// Time source shared by both stores.
    pub clock: SharedClock,
    /// Standby holder of the backing tables.
    pub heir: Heir,
    /// Reasoning sessions.
    pub sessions: Arc<SessionStore>,
    /// Outcome feedback and calibration.
    pub outcomes: Arc<OutcomeStore>,
}

/// Shared handle to the core state.
pub type SharedState = Arc<CoreState>;

impl CoreState {
    /// Build the engines with a fresh heir.
    pub fn new(config: Config, clock: SharedClock, sink: Option<Arc<dyn FeedbackSink>>) -> Self {
        Self::with_heir(config, clock, sink, Heir::new())
    }

    /// Build the engines, reclaiming any tables `heir` holds.
    pub fn with_heir(
        config: Config,
        clock: SharedClock,
        sink: Option<Arc<dyn FeedbackSink>>,
        heir: Heir,
    ) -> Self {
        let (sessions, session_table) =
            SessionStore::with_heir(config.session.clone(), clock.clone(), Some(heir.clone()));
        let (outcomes, outcome_table) = OutcomeStore::with_heir(
            config.feedback.clone(),
            clock.clone(),
            sink,
            Some(heir.clone()),
        );

        info!(
            sessions_reclaimed = session_table == Acquired::Reclaimed,
            outcomes_reclaimed = outcome_table == Acquired::Reclaimed,
            "Core state initialized"
        );

        Self {
            config,
            clock,
            heir,
            sessions: Arc::new(sessions),
            outcomes: Arc::new(outcomes),
        }
    }

    /// Start background sweep, prune and flush.
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        spawn_maintenance(
            Arc::clone(&self.sessions),
            Arc::clone(&self.outcomes),
            &self.config,
        )
    }

    /// Confidence corrected by the calibration data of `category`.
    pub fn calibrated_confidence(&self, category: Category, raw: f64) -> f64 {
        self.outcomes.calibration().calibrate(category, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::feedback::{FeedbackContext, Outcome};
    use crate::session::{CreateOptions, Strategy};

    #[test]
    fn test_restart_with_same_heir_keeps_state() {
        let heir = Heir::new();
        let clock: SharedClock = Arc::new(ManualClock::new());

        let first = CoreState::with_heir(Config::default(), clock.clone(), None, heir.clone());
        let session = first
            .sessions
            .create("kept", Strategy::Tot, CreateOptions::default());
        first
            .outcomes
            .record_outcome(Category::Retrieval, FeedbackContext::new(), Outcome::success());
        drop(first);

        let second = CoreState::with_heir(Config::default(), clock, None, heir);
        assert!(second.sessions.peek(&session.id).is_some());
        assert_eq!(second.outcomes.len(), 1);
    }

    #[test]
    fn test_calibrated_confidence_passthrough_without_data() {
        let state = CoreState::new(Config::default(), Arc::new(ManualClock::new()), None);
        assert_eq!(state.calibrated_confidence(Category::Prediction, 0.42), 0.42);
    }
}
