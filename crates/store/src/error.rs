use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the failure was a schema constraint (unique key or foreign
    /// key) rather than a storage fault.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StoreError::Sqlite(e) if is_unique_violation(e))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Whether an error is a SQLite UNIQUE/PRIMARY KEY violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
