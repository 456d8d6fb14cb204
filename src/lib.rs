//! # Reasoning Feedback Core
//!
//! In-memory engines for tracking reasoning attempts and learning from the
//! outcomes of decisions.
//!
//! ## Features
//!
//! - **Reasoning sessions**: chain-of-thought, tree-of-thoughts, ReAct and
//!   reflexion sessions with thoughts, branches and backtracking
//! - **Sliding TTL**: idle sessions are swept after an hour
//! - **Outcome feedback**: bounded log of decision outcomes with lifetime
//!   counters, trends, daily summaries and timelines
//! - **Confidence calibration**: reliability buckets per category and a
//!   correction factor for raw confidence estimates
//! - **Batched persistence**: failures and valuable successes go to a
//!   [`storage::FeedbackSink`] (SQLite by default)
//! - **Handoff recovery**: backing tables outlive their owner through a
//!   [`store::Heir`]
//!
//! ## Architecture
//!
//! ```text
//! callers ──▶ SessionStore ─┐
//!         ──▶ OutcomeStore ─┼──▶ ConcurrentStore / CounterTable ──drop──▶ Heir
//!                  │        │
//!                  ▼        └── maintenance (sweep, prune, flush)
//!          CalibrationEngine           │
//!                                      ▼
//!                               FeedbackSink (SQLite)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use reasoning_feedback_core::{Config, CoreState};
//! use reasoning_feedback_core::clock::SystemClock;
//! use reasoning_feedback_core::storage::SqliteFeedbackSink;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let sink = SqliteFeedbackSink::new(&config.database).await?;
//!     let state = CoreState::new(config, SystemClock::shared(), Some(Arc::new(sink)));
//!     let maintenance = state.spawn_maintenance();
//!     // ...
//!     maintenance.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Confidence calibration from recorded outcomes.
pub mod calibration;
/// Admin CLI commands.
pub mod cli;
/// Wall and monotonic time sources.
pub mod clock;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// Outcome feedback recording, summaries and batched persistence.
pub mod feedback;
/// Background sweep, prune and flush loops.
pub mod maintenance;
/// Reasoning session store.
pub mod session;
/// Engine bundle shared by callers and background tasks.
pub mod state;
/// Small statistics helpers.
pub mod stats;
/// Persistence of selected feedback.
pub mod storage;
/// Concurrent maps, counters and table handoff.
pub mod store;

pub use calibration::CalibrationEngine;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use feedback::{Category, OutcomeStore};
pub use session::SessionStore;
pub use state::{CoreState, SharedState};
