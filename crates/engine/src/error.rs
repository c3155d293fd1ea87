use fleetroster_core::{CoreError, StagingRowId};
use fleetroster_storage::StorageError;
use thiserror::Error;

use crate::validator::Conflict;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("no snapshot loaded")]
    NotLoaded,

    #[error("cannot {action} while {phase}")]
    InvalidTransition {
        action: &'static str,
        phase: &'static str,
    },

    #[error("staging row not found: {0}")]
    StagingRowNotFound(String),

    #[error("staged rows produce no writes")]
    NothingToCommit,

    #[error("{} staged row(s) no longer validate", .0.len())]
    StagingConflicts(Vec<(StagingRowId, Conflict)>),

    #[error("store rejected the batch: {source}")]
    Persistence {
        source: StorageError,
        /// The store no longer matches the loaded snapshot; retrying without
        /// a reload will fail the same way.
        reload_required: bool,
    },

    #[error("confirmation window expired")]
    Expired,

    #[error("config error: {0}")]
    Config(String),
}
