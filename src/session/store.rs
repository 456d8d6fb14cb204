use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::types::{
    BacktrackOutcome, Branch, BranchEvaluation, CreateOptions, NewBranch, NewThought, Session,
    SessionStats, SessionStatus, SessionUpdate, Strategy, Thought,
};
use crate::clock::SharedClock;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::store::{Acquired, ConcurrentStore, Heir, OwnedTable};

/// Heir registry name of the session table.
pub const SESSION_TABLE: &str = "reasoning_sessions";

type SessionTable = ConcurrentStore<String, Session>;

/// Concurrent, TTL-bounded store of reasoning sessions.
///
/// Every mutation runs in place under the table's write lock, so step numbers
/// are never handed out twice. Operations check all their preconditions
/// before the first write, so an error leaves the session untouched
/// (including its TTL).
pub struct SessionStore {
    table: OwnedTable<SessionTable>,
    clock: SharedClock,
    config: SessionConfig,
}

impl SessionStore {
    /// Create a store with a fresh table and no heir.
    pub fn new(config: SessionConfig, clock: SharedClock) -> Self {
        Self::with_heir(config, clock, None).0
    }

    /// Create a store, reclaiming the table held by `heir` when there is one.
    pub fn with_heir(
        config: SessionConfig,
        clock: SharedClock,
        heir: Option<Heir>,
    ) -> (Self, Acquired) {
        let (table, acquired) = OwnedTable::acquire(SESSION_TABLE, heir, SessionTable::new);
        if acquired == Acquired::Reclaimed {
            info!(sessions = table.len(), "Session store resumed with reclaimed sessions");
        }
        (
            Self {
                table,
                clock,
                config,
            },
            acquired,
        )
    }

    /// Number of sessions held.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no sessions are held.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Start a new reasoning session.
    pub fn create(
        &self,
        problem: impl Into<String>,
        strategy: Strategy,
        opts: CreateOptions,
    ) -> Session {
        let session = Session::new(problem, strategy, opts, self.clock.now());
        self.table.insert(session.id.clone(), session.clone());

        info!(
            session_id = %session.id,
            strategy = %strategy,
            "Reasoning session created"
        );
        session
    }

    /// Fetch a session, extending its TTL.
    pub fn get(&self, id: &str) -> SessionResult<Session> {
        self.mutate(id, |session, _| Ok(session.clone()))
    }

    /// Fetch a session without touching its TTL.
    pub fn peek(&self, id: &str) -> Option<Session> {
        self.table.get(&id.to_string())
    }

    /// Append a thought.
    ///
    /// The step number is `len(thoughts) + 1`. The branch defaults to the
    /// current branch; tree sessions also record the thought on that branch.
    pub fn add_thought(&self, id: &str, thought: NewThought) -> SessionResult<Session> {
        self.mutate(id, |session, now| {
            let branch_id = thought
                .branch_id
                .or_else(|| session.current_branch_id.clone());

            if let Some(ref branch_id) = branch_id {
                if session.branch(branch_id).is_none() {
                    return Err(branch_not_found(session, branch_id));
                }
            }

            let recorded = Thought {
                id: Uuid::new_v4().to_string(),
                content: thought.content,
                step: session.thoughts.len() as u32 + 1,
                evaluation: thought.evaluation,
                confidence: thought.confidence.map(|c| c.clamp(0.0, 1.0)),
                branch_id: branch_id.clone(),
                timestamp: now,
            };

            if session.is_tree() {
                if let Some(branch) = branch_id.as_deref().and_then(|b| session.branch_mut(b)) {
                    branch.thoughts.push(recorded.clone());
                }
            }
            if let Some(confidence) = recorded.confidence {
                session.confidence_history.push(confidence);
            }

            debug!(
                session_id = %session.id,
                step = recorded.step,
                branch_id = ?recorded.branch_id,
                "Thought added"
            );
            session.thoughts.push(recorded);
            Ok(session.clone())
        })
    }

    /// Add a branch and descend into it.
    pub fn add_branch(&self, id: &str, branch: NewBranch) -> SessionResult<Session> {
        self.mutate(id, |session, now| {
            require_tree(session, "add_branch")?;

            let branch_id = branch
                .id
                .unwrap_or_else(|| format!("branch_{}", Uuid::new_v4()));
            if session.branch(&branch_id).is_some() {
                return Err(SessionError::Precondition {
                    message: format!("branch {} already exists in session {}", branch_id, session.id),
                });
            }

            let parent_id = branch
                .parent_id
                .or_else(|| session.current_branch_id.clone());
            if let Some(ref parent_id) = parent_id {
                if session.branch(parent_id).is_none() {
                    return Err(branch_not_found(session, parent_id));
                }
            }

            let mut new_branch = Branch {
                id: branch_id.clone(),
                parent_id,
                thoughts: Vec::new(),
                evaluation: branch.evaluation,
                explored: false,
                created_at: now,
            };
            if new_branch.evaluation == BranchEvaluation::DeadEnd {
                new_branch.mark_dead_end();
            }

            debug!(
                session_id = %session.id,
                branch_id = %branch_id,
                parent_id = ?new_branch.parent_id,
                "Branch added"
            );
            session.branches.push(new_branch);
            session.current_branch_id = Some(branch_id);
            Ok(session.clone())
        })
    }

    /// Make `branch_id` the current branch.
    pub fn switch_branch(&self, id: &str, branch_id: &str) -> SessionResult<Session> {
        self.mutate(id, |session, _| {
            require_tree(session, "switch_branch")?;
            if session.branch(branch_id).is_none() {
                return Err(branch_not_found(session, branch_id));
            }
            session.current_branch_id = Some(branch_id.to_string());
            Ok(session.clone())
        })
    }

    /// Mark a branch as a dead end. The current branch is left unchanged.
    pub fn mark_dead_end(&self, id: &str, branch_id: &str) -> SessionResult<Session> {
        self.mutate(id, |session, _| {
            require_tree(session, "mark_dead_end")?;
            let session_id = session.id.clone();
            let branch = session
                .branch_mut(branch_id)
                .ok_or_else(|| SessionError::BranchNotFound {
                    session_id,
                    branch_id: branch_id.to_string(),
                })?;
            branch.mark_dead_end();
            Ok(session.clone())
        })
    }

    /// Re-assess a branch. Dead ends cannot be reopened.
    pub fn evaluate_branch(
        &self,
        id: &str,
        branch_id: &str,
        evaluation: BranchEvaluation,
    ) -> SessionResult<Session> {
        self.mutate(id, |session, _| {
            require_tree(session, "evaluate_branch")?;
            let session_id = session.id.clone();
            let branch = session
                .branch_mut(branch_id)
                .ok_or_else(|| SessionError::BranchNotFound {
                    session_id,
                    branch_id: branch_id.to_string(),
                })?;

            match (branch.evaluation, evaluation) {
                (_, BranchEvaluation::DeadEnd) => branch.mark_dead_end(),
                (BranchEvaluation::DeadEnd, _) => {
                    return Err(SessionError::Precondition {
                        message: format!("branch {} is a dead end", branch_id),
                    })
                }
                (BranchEvaluation::Promising | BranchEvaluation::Uncertain, new) => {
                    branch.evaluation = new
                }
            }
            Ok(session.clone())
        })
    }

    /// Flag a branch as fully explored without judging it.
    pub fn mark_explored(&self, id: &str, branch_id: &str) -> SessionResult<Session> {
        self.mutate(id, |session, _| {
            require_tree(session, "mark_explored")?;
            let session_id = session.id.clone();
            let branch = session
                .branch_mut(branch_id)
                .ok_or_else(|| SessionError::BranchNotFound {
                    session_id,
                    branch_id: branch_id.to_string(),
                })?;
            branch.explored = true;
            Ok(session.clone())
        })
    }

    /// Best open branch of a session, extending its TTL.
    pub fn find_best_unexplored(&self, id: &str) -> SessionResult<Option<Branch>> {
        self.mutate(id, |session, _| Ok(session.find_best_unexplored().cloned()))
    }

    /// Abandon the current branch and move to the best open one.
    ///
    /// The current branch is marked as a dead end first, so it can never be
    /// the branch selected.
    pub fn backtrack(&self, id: &str) -> SessionResult<(Session, BacktrackOutcome)> {
        self.mutate(id, |session, _| {
            require_tree(session, "backtrack")?;
            let abandoned = session
                .current_branch_id
                .clone()
                .ok_or_else(|| SessionError::Precondition {
                    message: format!("session {} has no current branch", session.id),
                })?;
            if let Some(branch) = session.branch_mut(&abandoned) {
                branch.mark_dead_end();
            }

            let outcome = match session.find_best_unexplored().cloned() {
                Some(next) => {
                    session.current_branch_id = Some(next.id.clone());
                    info!(
                        session_id = %session.id,
                        from = %abandoned,
                        to = %next.id,
                        "Backtracked to open branch"
                    );
                    BacktrackOutcome::Switched {
                        abandoned,
                        to: next,
                    }
                }
                None => {
                    info!(session_id = %session.id, "No open branches left after backtrack");
                    BacktrackOutcome::Exhausted { abandoned }
                }
            };
            Ok((session.clone(), outcome))
        })
    }

    /// Apply a partial update.
    pub fn update(&self, id: &str, update: SessionUpdate) -> SessionResult<Session> {
        self.mutate(id, |session, now| {
            if let Some(status) = update.status {
                set_status(session, status, now);
            }
            if let Some(decomposition) = update.decomposition {
                session.decomposition = decomposition;
            }
            if let Some(metadata) = update.metadata {
                session.metadata.extend(metadata);
            }
            Ok(session.clone())
        })
    }

    /// Conclude a session. Requires at least one thought.
    pub fn complete(&self, id: &str, conclusion: Option<String>) -> SessionResult<Session> {
        self.mutate(id, |session, now| {
            if session.thoughts.is_empty() {
                return Err(SessionError::Precondition {
                    message: format!("session {} has no thoughts to conclude from", session.id),
                });
            }
            set_status(session, SessionStatus::Completed, now);
            session.conclusion = conclusion;

            info!(
                session_id = %session.id,
                thoughts = session.thoughts.len(),
                avg_confidence = ?session.average_confidence(),
                "Reasoning session completed"
            );
            Ok(session.clone())
        })
    }

    /// Mark a session as stuck.
    pub fn mark_stuck(&self, id: &str) -> SessionResult<Session> {
        self.mutate(id, |session, now| {
            set_status(session, SessionStatus::Stuck, now);
            info!(session_id = %session.id, thoughts = session.thoughts.len(), "Reasoning session stuck");
            Ok(session.clone())
        })
    }

    /// Mark a session as abandoned.
    pub fn abandon(&self, id: &str) -> SessionResult<Session> {
        self.mutate(id, |session, now| {
            set_status(session, SessionStatus::Abandoned, now);
            Ok(session.clone())
        })
    }

    /// Remove a session. Returns whether it existed.
    pub fn delete(&self, id: &str) -> bool {
        self.table.remove(&id.to_string()).is_some()
    }

    /// Sessions still in the active state.
    pub fn list_active(&self) -> Vec<Session> {
        self.table.read(|sessions| {
            sessions
                .values()
                .filter(|s| s.status == SessionStatus::Active)
                .cloned()
                .collect()
        })
    }

    /// Aggregate counts over all sessions.
    pub fn stats(&self) -> SessionStats {
        self.table.read(|sessions| {
            let mut stats = SessionStats {
                total: sessions.len(),
                ..Default::default()
            };
            for session in sessions.values() {
                *stats.by_status.entry(session.status).or_default() += 1;
                *stats.by_strategy.entry(session.strategy).or_default() += 1;
                stats.total_thoughts += session.thoughts.len();
                stats.total_branches += session.branches.len();
            }
            stats
        })
    }

    /// Evict sessions idle for longer than the configured TTL.
    ///
    /// Returns the number removed. Safe to run concurrently with itself.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.config.ttl();
        let removed = self.table.retain(|_, session| !session.is_expired(now, ttl));

        if removed > 0 {
            info!(removed = removed, remaining = self.table.len(), "Expired reasoning sessions evicted");
        } else {
            debug!(remaining = self.table.len(), "Session sweep found nothing to evict");
        }
        removed
    }

    fn mutate<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session, DateTime<Utc>) -> SessionResult<R>,
    ) -> SessionResult<R> {
        let now = self.clock.now();
        self.table
            .with_mut(&id.to_string(), |session| {
                let previous = std::mem::replace(&mut session.last_activity, now);
                let result = f(session, now);
                if result.is_err() {
                    session.last_activity = previous;
                }
                result
            })
            .unwrap_or_else(|| {
                Err(SessionError::NotFound {
                    session_id: id.to_string(),
                })
            })
    }
}

fn require_tree(session: &Session, operation: &str) -> SessionResult<()> {
    if session.is_tree() {
        Ok(())
    } else {
        Err(SessionError::InvalidStrategy {
            session_id: session.id.clone(),
            strategy: session.strategy.to_string(),
            operation: operation.to_string(),
        })
    }
}

fn branch_not_found(session: &Session, branch_id: &str) -> SessionError {
    SessionError::BranchNotFound {
        session_id: session.id.clone(),
        branch_id: branch_id.to_string(),
    }
}

fn set_status(session: &mut Session, status: SessionStatus, now: DateTime<Utc>) {
    session.status = status;
    session.completed_at = match status {
        SessionStatus::Active => None,
        SessionStatus::Completed | SessionStatus::Stuck | SessionStatus::Abandoned => Some(now),
    };
}
