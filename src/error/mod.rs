use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Reasoning session errors.
///
/// All variants are non-fatal: the session store is left untouched when one
/// of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("Branch not found: {branch_id} (session {session_id})")]
    BranchNotFound {
        session_id: String,
        branch_id: String,
    },

    #[error("Operation '{operation}' requires tree-of-thoughts, session {session_id} uses {strategy}")]
    InvalidStrategy {
        session_id: String,
        strategy: String,
        operation: String,
    },

    #[error("Precondition failed: {message}")]
    Precondition { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Persistence timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for session store operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
