use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::stats::{mean, Trend};

/// Id of the branch every tree-of-thoughts session starts on.
pub const ROOT_BRANCH_ID: &str = "branch_root";

/// Reasoning strategy used by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Chain of thought.
    Cot,
    /// Tree of thoughts.
    Tot,
    /// Reason + act.
    React,
    /// Self-reflection loop.
    Reflexion,
}

impl Strategy {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Cot => "cot",
            Strategy::Tot => "tot",
            Strategy::React => "react",
            Strategy::Reflexion => "reflexion",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cot" => Ok(Strategy::Cot),
            "tot" => Ok(Strategy::Tot),
            "react" => Ok(Strategy::React),
            "reflexion" => Ok(Strategy::Reflexion),
            _ => Err(format!("Unknown strategy: {}", s)),
        }
    }
}

/// Lifecycle status of a session.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Still being reasoned on.
    #[default]
    Active,
    /// Reached a conclusion.
    Completed,
    /// Caller gave up making progress.
    Stuck,
    /// Dropped without a conclusion.
    Abandoned,
}

impl SessionStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Stuck => "stuck",
            SessionStatus::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "stuck" => Ok(SessionStatus::Stuck),
            "abandoned" => Ok(SessionStatus::Abandoned),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

/// Caller's judgement of a single thought.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtEvaluation {
    /// Moves the reasoning forward.
    Good,
    /// Unclear value.
    Maybe,
    /// Wrong or unhelpful.
    Bad,
    /// Not evaluated yet.
    #[default]
    Unset,
}

impl std::fmt::Display for ThoughtEvaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThoughtEvaluation::Good => write!(f, "good"),
            ThoughtEvaluation::Maybe => write!(f, "maybe"),
            ThoughtEvaluation::Bad => write!(f, "bad"),
            ThoughtEvaluation::Unset => write!(f, "unset"),
        }
    }
}

impl std::str::FromStr for ThoughtEvaluation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "good" => Ok(ThoughtEvaluation::Good),
            "maybe" => Ok(ThoughtEvaluation::Maybe),
            "bad" => Ok(ThoughtEvaluation::Bad),
            "unset" => Ok(ThoughtEvaluation::Unset),
            _ => Err(format!("Unknown thought evaluation: {}", s)),
        }
    }
}

/// Assessment of a tree-of-thoughts branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchEvaluation {
    /// Worth exploring first.
    Promising,
    /// No signal either way.
    #[default]
    Uncertain,
    /// Known not to lead anywhere; never selected again.
    DeadEnd,
}

impl BranchEvaluation {
    /// Selection priority, lower is explored first.
    pub fn priority(&self) -> u8 {
        match self {
            BranchEvaluation::Promising => 0,
            BranchEvaluation::Uncertain => 1,
            BranchEvaluation::DeadEnd => 2,
        }
    }
}

impl std::fmt::Display for BranchEvaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchEvaluation::Promising => write!(f, "promising"),
            BranchEvaluation::Uncertain => write!(f, "uncertain"),
            BranchEvaluation::DeadEnd => write!(f, "dead_end"),
        }
    }
}

impl std::str::FromStr for BranchEvaluation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "promising" => Ok(BranchEvaluation::Promising),
            "uncertain" => Ok(BranchEvaluation::Uncertain),
            "dead_end" => Ok(BranchEvaluation::DeadEnd),
            _ => Err(format!("Unknown branch evaluation: {}", s)),
        }
    }
}

/// A single reasoning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    /// Unique thought identifier.
    pub id: String,
    /// The thought content/text.
    pub content: String,
    /// 1-based position within the session.
    pub step: u32,
    /// Caller's evaluation.
    pub evaluation: ThoughtEvaluation,
    /// Confidence score (0.0-1.0), when the caller supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Branch the thought belongs to (tree mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    /// When the thought was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Caller input for [`SessionStore::add_thought`](super::SessionStore::add_thought).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewThought {
    /// The thought content/text.
    pub content: String,
    /// Caller's evaluation.
    #[serde(default)]
    pub evaluation: ThoughtEvaluation,
    /// Confidence score (0.0-1.0).
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Target branch; defaults to the session's current branch.
    #[serde(default)]
    pub branch_id: Option<String>,
}

impl NewThought {
    /// Create a thought with the given content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Set confidence, clamped to [0.0, 1.0].
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    /// Set the evaluation.
    pub fn with_evaluation(mut self, evaluation: ThoughtEvaluation) -> Self {
        self.evaluation = evaluation;
        self
    }

    /// Attach to an explicit branch.
    pub fn on_branch(mut self, branch_id: impl Into<String>) -> Self {
        self.branch_id = Some(branch_id.into());
        self
    }
}

/// A tree-of-thoughts node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// Unique branch identifier.
    pub id: String,
    /// Parent branch; `None` only for the root.
    pub parent_id: Option<String>,
    /// Copies of the session thoughts recorded on this branch.
    pub thoughts: Vec<Thought>,
    /// Current assessment.
    pub evaluation: BranchEvaluation,
    /// Whether the branch has been fully explored.
    pub explored: bool,
    /// When the branch was created.
    pub created_at: DateTime<Utc>,
}

impl Branch {
    /// Root branch of a new tree-of-thoughts session.
    pub fn root(now: DateTime<Utc>) -> Self {
        Self {
            id: ROOT_BRANCH_ID.to_string(),
            parent_id: None,
            thoughts: Vec::new(),
            evaluation: BranchEvaluation::Uncertain,
            explored: false,
            created_at: now,
        }
    }

    /// Whether the branch is still eligible for selection.
    pub fn is_open(&self) -> bool {
        !self.explored && self.evaluation != BranchEvaluation::DeadEnd
    }

    /// Mark as a dead end; dead ends are always explored.
    pub fn mark_dead_end(&mut self) {
        self.evaluation = BranchEvaluation::DeadEnd;
        self.explored = true;
    }
}

/// Caller input for [`SessionStore::add_branch`](super::SessionStore::add_branch).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBranch {
    /// Explicit id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Parent branch; defaults to the session's current branch.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Initial assessment.
    #[serde(default)]
    pub evaluation: BranchEvaluation,
}

impl NewBranch {
    /// Branch with generated id, current-branch parent, uncertain evaluation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Use an explicit parent.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the initial evaluation.
    pub fn with_evaluation(mut self, evaluation: BranchEvaluation) -> Self {
        self.evaluation = evaluation;
        self
    }
}

/// Options accepted by [`SessionStore::create`](super::SessionStore::create).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Sub-problems identified up front.
    #[serde(default)]
    pub decomposition: Vec<String>,
    /// Related problems recalled by the caller.
    #[serde(default)]
    pub similar_problems: Vec<String>,
}

/// One in-flight or finished reasoning attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Problem statement.
    pub problem: String,
    /// Reasoning strategy.
    pub strategy: Strategy,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Append-only reasoning steps.
    pub thoughts: Vec<Thought>,
    /// Tree-of-thoughts branches in creation order.
    pub branches: Vec<Branch>,
    /// Branch new thoughts land on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_branch_id: Option<String>,
    /// Confidence of each thought that carried one, in order.
    pub confidence_history: Vec<f64>,
    /// Sub-problems identified up front.
    pub decomposition: Vec<String>,
    /// Related problems recalled by the caller.
    pub similar_problems: Vec<String>,
    /// Open extension map, merged by updates.
    pub metadata: Map<String, Value>,
    /// Final answer recorded on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
    /// Last read or write; drives the sliding TTL.
    pub last_activity: DateTime<Utc>,
    /// When the session left the active state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a session; tree-of-thoughts sessions start on the root branch.
    pub fn new(
        problem: impl Into<String>,
        strategy: Strategy,
        opts: CreateOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let (branches, current_branch_id) = match strategy {
            Strategy::Tot => (vec![Branch::root(now)], Some(ROOT_BRANCH_ID.to_string())),
            Strategy::Cot | Strategy::React | Strategy::Reflexion => (Vec::new(), None),
        };

        Self {
            id: Uuid::new_v4().to_string(),
            problem: problem.into(),
            strategy,
            status: SessionStatus::Active,
            thoughts: Vec::new(),
            branches,
            current_branch_id,
            confidence_history: Vec::new(),
            decomposition: opts.decomposition,
            similar_problems: opts.similar_problems,
            metadata: Map::new(),
            conclusion: None,
            started_at: now,
            last_activity: now,
            completed_at: None,
        }
    }

    /// Whether the session uses tree-of-thoughts.
    pub fn is_tree(&self) -> bool {
        self.strategy == Strategy::Tot
    }

    /// Look up a branch.
    pub fn branch(&self, branch_id: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.id == branch_id)
    }

    /// Look up a branch mutably.
    pub fn branch_mut(&mut self, branch_id: &str) -> Option<&mut Branch> {
        self.branches.iter_mut().find(|b| b.id == branch_id)
    }

    /// The current branch, if any.
    pub fn current_branch(&self) -> Option<&Branch> {
        self.current_branch_id
            .as_deref()
            .and_then(|id| self.branch(id))
    }

    /// Best branch left to explore.
    ///
    /// Candidates are unexplored and not dead ends. Promising beats uncertain;
    /// among equals the most recently created branch wins, so backtracking
    /// resumes at the nearest open alternative. `None` means the tree is
    /// exhausted.
    pub fn find_best_unexplored(&self) -> Option<&Branch> {
        self.branches
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_open())
            .min_by_key(|(idx, b)| (b.evaluation.priority(), std::cmp::Reverse(*idx)))
            .map(|(_, b)| b)
    }

    /// Mean of the confidence history.
    pub fn average_confidence(&self) -> Option<f64> {
        mean(&self.confidence_history)
    }

    /// Compare the later half of the confidence history with the earlier half.
    pub fn confidence_trend(&self) -> Trend {
        let history = &self.confidence_history;
        if history.len() < 4 {
            return Trend::InsufficientData;
        }
        let (earlier, later) = history.split_at(history.len() / 2);
        match (mean(later), mean(earlier)) {
            (Some(recent), Some(previous)) => Trend::classify(recent, previous, 0.05),
            _ => Trend::InsufficientData,
        }
    }

    /// Whether the session has been idle for longer than `ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_activity > ttl
    }
}

/// Partial update applied by [`SessionStore::update`](super::SessionStore::update).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionUpdate {
    /// New status.
    #[serde(default)]
    pub status: Option<SessionStatus>,
    /// Replacement decomposition.
    #[serde(default)]
    pub decomposition: Option<Vec<String>>,
    /// Keys merged into the session metadata.
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Result of a backtrack step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BacktrackOutcome {
    /// The abandoned branch was marked dead and another became current.
    Switched {
        /// Branch marked as a dead end.
        abandoned: String,
        /// Branch now current.
        to: Branch,
    },
    /// No open branch remains; the caller should move to a conclusion.
    Exhausted {
        /// Branch marked as a dead end.
        abandoned: String,
    },
}

/// Aggregate view over the session store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    /// Sessions currently held.
    pub total: usize,
    /// Sessions per status.
    pub by_status: std::collections::BTreeMap<SessionStatus, usize>,
    /// Sessions per strategy.
    pub by_strategy: std::collections::BTreeMap<Strategy, usize>,
    /// Thoughts across all sessions.
    pub total_thoughts: usize,
    /// Tree-of-thoughts branches across all sessions.
    pub total_branches: usize,
}
