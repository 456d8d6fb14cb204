//! Periodic background work.
//!
//! - session sweep: removes sessions idle longer than the TTL
//! - outcome upkeep: prunes over-capacity entries and flushes the persistence queue
//!
//! Each loop runs under a supervisor that restarts it if it panics. Shutdown
//! is signalled through a watch channel; the outcome loop flushes once more
//! before exiting.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::feedback::OutcomeStore;
use crate::session::SessionStore;

/// Pause before restarting a panicked loop.
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Running maintenance loops.
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Number of supervised loops.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Whether every loop is still running.
    pub fn is_running(&self) -> bool {
        self.tasks.iter().all(|t| !t.is_finished())
    }

    /// Signal shutdown and wait for all loops to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Maintenance supervisor ended abnormally");
            }
        }
        info!("Maintenance stopped");
    }
}

/// Start the session sweep and outcome upkeep loops.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_maintenance(
    sessions: Arc<SessionStore>,
    outcomes: Arc<OutcomeStore>,
    config: &Config,
) -> MaintenanceHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);

    let sweep_every = config.session.cleanup_interval();
    let flush_every = config.feedback.flush_interval();

    let sweep = supervise("session_sweep", shutdown_rx.clone(), move |rx| {
        run_session_sweep(Arc::clone(&sessions), sweep_every, rx)
    });
    let upkeep = supervise("outcome_upkeep", shutdown_rx, move |rx| {
        run_outcome_upkeep(Arc::clone(&outcomes), flush_every, rx)
    });

    info!(
        sweep_secs = sweep_every.as_secs(),
        flush_secs = flush_every.as_secs(),
        "Maintenance started"
    );

    MaintenanceHandle {
        shutdown,
        tasks: vec![sweep, upkeep],
    }
}

/// Run the loop built by `factory`, restarting it whenever it panics.
///
/// The supervisor ends when the loop returns normally or shutdown is signalled.
pub fn supervise<F, Fut>(
    name: &'static str,
    shutdown: watch::Receiver<bool>,
    factory: F,
) -> JoinHandle<()>
where
    F: Fn(watch::Receiver<bool>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut restarts = 0u32;
        loop {
            let task = tokio::spawn(factory(shutdown.clone()));
            match task.await {
                Ok(()) => {
                    debug!(task = name, "Maintenance loop exited");
                    return;
                }
                Err(e) if e.is_panic() => {
                    restarts += 1;
                    error!(task = name, restarts, "Maintenance loop panicked, restarting");
                }
                Err(e) => {
                    warn!(task = name, error = %e, "Maintenance loop cancelled");
                    return;
                }
            }

            if *shutdown.borrow() {
                return;
            }
            tokio::time::sleep(RESTART_DELAY).await;
        }
    })
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let start = tokio::time::Instant::now() + period;
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn run_session_sweep(
    sessions: Arc<SessionStore>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticks = ticker(period);
    loop {
        tokio::select! {
            _ = ticks.tick() => {
                let removed = sessions.cleanup_expired();
                debug!(removed, remaining = sessions.len(), "Session sweep finished");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn run_outcome_upkeep(
    outcomes: Arc<OutcomeStore>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticks = ticker(period);
    loop {
        tokio::select! {
            _ = ticks.tick() => {
                let pruned = outcomes.prune();
                if pruned > 0 {
                    info!(pruned, "Scheduled prune removed feedback entries");
                }
                let report = outcomes.flush().await;
                debug!(drained = report.drained, persisted = report.persisted, "Scheduled flush finished");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let report = outcomes.flush().await;
                    info!(drained = report.drained, persisted = report.persisted, "Final flush before shutdown");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::feedback::{Category, FeedbackContext, Outcome};
    use crate::session::{CreateOptions, Strategy};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn stores(clock: Arc<ManualClock>, config: &Config) -> (Arc<SessionStore>, Arc<OutcomeStore>) {
        let sessions = Arc::new(SessionStore::new(config.session.clone(), clock.clone()));
        let outcomes = Arc::new(OutcomeStore::new(config.feedback.clone(), clock, None));
        (sessions, outcomes)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_idle_sessions() {
        let config = Config::default();
        let clock = Arc::new(ManualClock::new());
        let (sessions, outcomes) = stores(clock.clone(), &config);
        sessions.create("stale", Strategy::Cot, CreateOptions::default());

        let handle = spawn_maintenance(Arc::clone(&sessions), outcomes, &config);
        clock.advance(chrono::Duration::hours(2));

        tokio::time::sleep(config.session.cleanup_interval() + Duration::from_secs(1)).await;
        assert!(sessions.is_empty());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_upkeep_flushes_on_interval() {
        let config = Config::default();
        let clock = Arc::new(ManualClock::new());
        let (sessions, outcomes) = stores(clock, &config);
        outcomes.record_outcome(Category::Retrieval, FeedbackContext::new(), Outcome::success());
        assert_eq!(outcomes.stats().pending_flush, 1);

        let handle = spawn_maintenance(sessions, Arc::clone(&outcomes), &config);
        tokio::time::sleep(config.feedback.flush_interval() + Duration::from_secs(1)).await;
        assert_eq!(outcomes.stats().pending_flush, 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_pending() {
        let config = Config::default();
        let clock = Arc::new(ManualClock::new());
        let (sessions, outcomes) = stores(clock, &config);

        let handle = spawn_maintenance(sessions, Arc::clone(&outcomes), &config);
        assert_eq!(handle.task_count(), 2);
        assert!(handle.is_running());

        outcomes.record_outcome(Category::Prediction, FeedbackContext::new(), Outcome::success());
        handle.shutdown().await;
        assert_eq!(outcomes.stats().pending_flush, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_restarts_after_panic() {
        let (_tx, rx) = watch::channel(false);
        let runs = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&runs);

        let handle = supervise("flaky", rx, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first run fails");
                }
            }
        });

        handle.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_stops_on_shutdown_after_panic() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let handle = supervise("always_panics", rx, |_| async {
            panic!("broken");
        });

        handle.await.unwrap();
    }
}
