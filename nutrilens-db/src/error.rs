//! Database error types.

/// Database operation errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// SQL error from sqlx
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Food log not found
    #[error("Food log not found: {0}")]
    FoodLogNotFound(String),

    /// Inference task not found
    #[error("Inference task not found: {0}")]
    TaskNotFound(String),

    /// Invalid status transition
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// The task lease was released or taken over by another handler
    #[error("Lease on task {0} is no longer held")]
    LeaseLost(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for database operations
pub type DbResult<T> = Result<T, DbError>;
