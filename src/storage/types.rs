use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-facing messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A feed with the same name is already registered
    #[error("feed with name '{0}' already exists")]
    DuplicateFeed(String),

    /// No feed carries the requested name
    #[error("feed not found: {0}")]
    FeedNotFound(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// True when a sqlx error is a UNIQUE constraint violation.
    pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered feed source.
///
/// Timestamps are unix milliseconds. `updated_at` is the time of the last fetch
/// attempt; a freshly added feed starts with `updated_at == created_at`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A stored article. `link` is unique across the whole table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub published_at: i64,
    pub description: Option<String>,
    pub created_at: i64,
}

/// Article about to be inserted by a worker
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub published_at: i64,
    pub description: Option<String>,
}

/// Current time as unix milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
