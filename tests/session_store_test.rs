//! Integration tests for the reasoning session store
//!
//! Covers tree-of-thoughts navigation, backtracking, TTL expiry and
//! concurrent mutation through the public API.

use std::sync::Arc;

use chrono::Duration;

use reasoning_feedback_core::clock::ManualClock;
use reasoning_feedback_core::config::SessionConfig;
use reasoning_feedback_core::error::SessionError;
use reasoning_feedback_core::session::{
    BacktrackOutcome, BranchEvaluation, CreateOptions, NewBranch, NewThought, SessionStatus,
    SessionStore, Strategy, ROOT_BRANCH_ID,
};

fn store() -> (SessionStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    (SessionStore::new(SessionConfig::default(), clock.clone()), clock)
}

mod tree_tests {
    use super::*;

    #[test]
    fn test_tot_session_starts_on_root() {
        let (store, _) = store();
        let session = store.create("plan a trip", Strategy::Tot, CreateOptions::default());

        assert_eq!(session.branches.len(), 1);
        assert_eq!(session.current_branch_id.as_deref(), Some(ROOT_BRANCH_ID));
        assert_eq!(session.branches[0].id, ROOT_BRANCH_ID);
    }

    #[test]
    fn test_dead_branch_is_never_selected() {
        let (store, _) = store();
        let s = store.create("problem", Strategy::Tot, CreateOptions::default());

        store
            .add_branch(&s.id, NewBranch::new().with_id("b1"))
            .unwrap();
        let session = store
            .add_branch(&s.id, NewBranch::new().with_id("b2"))
            .unwrap();
        assert_eq!(session.current_branch_id.as_deref(), Some("b2"));
        assert_eq!(session.branch("b2").unwrap().parent_id.as_deref(), Some("b1"));

        store.mark_dead_end(&s.id, "b2").unwrap();

        let best = store.find_best_unexplored(&s.id).unwrap().unwrap();
        assert_eq!(best.id, "b1");
        assert_eq!(best.evaluation, BranchEvaluation::Uncertain);
    }

    #[test]
    fn test_dead_end_excluded_even_when_promising_before() {
        let (store, _) = store();
        let s = store.create("problem", Strategy::Tot, CreateOptions::default());
        store
            .add_branch(
                &s.id,
                NewBranch::new()
                    .with_id("star")
                    .with_evaluation(BranchEvaluation::Promising),
            )
            .unwrap();
        store.mark_dead_end(&s.id, "star").unwrap();

        for _ in 0..3 {
            let best = store.find_best_unexplored(&s.id).unwrap();
            assert_ne!(best.map(|b| b.id), Some("star".to_string()));
        }
    }

    #[test]
    fn test_backtrack_walks_up_until_exhausted() {
        let (store, _) = store();
        let s = store.create("problem", Strategy::Tot, CreateOptions::default());
        store
            .add_branch(&s.id, NewBranch::new().with_id("b1"))
            .unwrap();

        let (session, outcome) = store.backtrack(&s.id).unwrap();
        match outcome {
            BacktrackOutcome::Switched { abandoned, to } => {
                assert_eq!(abandoned, "b1");
                assert_eq!(to.id, ROOT_BRANCH_ID);
            }
            other => panic!("expected switch, got {:?}", other),
        }
        assert_eq!(session.current_branch_id.as_deref(), Some(ROOT_BRANCH_ID));

        let (_, outcome) = store.backtrack(&s.id).unwrap();
        assert!(matches!(outcome, BacktrackOutcome::Exhausted { .. }));
    }

    #[test]
    fn test_tree_operations_rejected_for_linear_strategies() {
        let (store, _) = store();
        let s = store.create("problem", Strategy::React, CreateOptions::default());

        let err = store.add_branch(&s.id, NewBranch::new()).unwrap_err();
        assert!(matches!(err, SessionError::InvalidStrategy { .. }));
        let err = store.backtrack(&s.id).unwrap_err();
        assert!(matches!(err, SessionError::InvalidStrategy { .. }));
    }

    #[test]
    fn test_thoughts_recorded_on_current_branch() {
        let (store, _) = store();
        let s = store.create("problem", Strategy::Tot, CreateOptions::default());
        store
            .add_branch(&s.id, NewBranch::new().with_id("b1"))
            .unwrap();
        store
            .add_thought(&s.id, NewThought::new("explore b1").with_confidence(0.6))
            .unwrap();
        let session = store
            .add_thought(&s.id, NewThought::new("back on root").on_branch(ROOT_BRANCH_ID))
            .unwrap();

        assert_eq!(session.thoughts.len(), 2);
        assert_eq!(session.branch("b1").unwrap().thoughts.len(), 1);
        assert_eq!(session.branch(ROOT_BRANCH_ID).unwrap().thoughts[0].step, 2);
        assert_eq!(session.confidence_history, vec![0.6]);
    }
}

mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_sliding_ttl_keeps_touched_sessions() {
        let (store, clock) = store();
        let kept = store.create("kept", Strategy::Cot, CreateOptions::default());
        let dropped = store.create("dropped", Strategy::Cot, CreateOptions::default());

        // Touch `kept` every 30 minutes for 3 hours
        for _ in 0..6 {
            clock.advance(Duration::minutes(30));
            store.get(&kept.id).unwrap();
            store.cleanup_expired();
        }

        assert!(store.peek(&kept.id).is_some());
        assert!(store.peek(&dropped.id).is_none());
    }

    #[test]
    fn test_untouched_session_evicted_after_61_minutes() {
        let (store, clock) = store();
        let s = store.create("idle", Strategy::Reflexion, CreateOptions::default());

        clock.advance(Duration::minutes(61));
        assert_eq!(store.cleanup_expired(), 1);
        assert!(matches!(
            store.get(&s.id),
            Err(SessionError::NotFound { .. })
        ));
    }

    #[test]
    fn test_complete_then_list_active() {
        let (store, _) = store();
        let done = store.create("done", Strategy::Cot, CreateOptions::default());
        let open = store.create("open", Strategy::Cot, CreateOptions::default());

        store.add_thought(&done.id, NewThought::new("answer")).unwrap();
        let completed = store
            .complete(&done.id, Some("42".to_string()))
            .unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(completed.completed_at.is_some());

        let active: Vec<_> = store.list_active().into_iter().map(|s| s.id).collect();
        assert_eq!(active, vec![open.id]);
    }

    #[test]
    fn test_concurrent_thoughts_get_unique_steps() {
        let (store, _) = store();
        let store = Arc::new(store);
        let s = store.create("busy", Strategy::Cot, CreateOptions::default());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                let id = s.id.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store
                            .add_thought(&id, NewThought::new(format!("t{}-{}", t, i)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let session = store.get(&s.id).unwrap();
        let mut steps: Vec<u32> = session.thoughts.iter().map(|t| t.step).collect();
        steps.sort_unstable();
        assert_eq!(steps, (1..=200).collect::<Vec<_>>());
    }
}
