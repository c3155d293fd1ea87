use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("stale {kind} {id}: expected version {expected}")]
    Stale {
        kind: &'static str,
        id: String,
        expected: u64,
    },

    #[error("batch already applied: {0}")]
    DuplicateBatch(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("core error: {0}")]
    Core(#[from] fleetroster_core::CoreError),
}

impl StorageError {
    /// Whether the store rejected the write because the caller's snapshot no
    /// longer matches what it holds.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            Self::Stale { .. }
                | Self::NotFound(_)
                | Self::ConstraintViolation(_)
                | Self::DuplicateBatch(_)
        )
    }
}
