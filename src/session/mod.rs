//! Reasoning session engine.
//!
//! Holds in-flight reasoning attempts with their thoughts and, for
//! tree-of-thoughts sessions, the branch tree used for backtracking.
//!
//! ```text
//! create ──▶ add_thought / add_branch / switch_branch / mark_dead_end
//!                      │
//!                      ▼
//!        complete / mark_stuck / abandon     (explicit end)
//!        cleanup_expired after 1h idle        (implicit end)
//! ```
//!
//! Reads through [`SessionStore::get`] extend a session's life (sliding TTL).

mod store;
mod types;


pub use store::{SessionStore, SESSION_TABLE};
pub use types::{
    BacktrackOutcome, Branch, BranchEvaluation, CreateOptions, NewBranch, NewThought, Session,
    SessionStats, SessionStatus, SessionUpdate, Strategy, Thought, ThoughtEvaluation,
    ROOT_BRANCH_ID,
};
