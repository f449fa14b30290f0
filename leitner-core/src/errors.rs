use crate::DeckId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error("invalid input: {0}")]
    Invalid(&'static str),
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("storage error ({op}): {message}")]
    Storage { op: &'static str, message: String },
}

impl CoreError {
    pub fn storage(op: &'static str, err: impl fmt::Display) -> Self {
        CoreError::Storage {
            op,
            message: err.to_string(),
        }
    }
}

/// Steps of a tag reconciliation, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Begin,
    LockCard,
    LookupTags,
    CreateTags,
    ClearPivots,
    InsertPivots,
    Commit,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Begin => "begin",
            SyncPhase::LockCard => "lock card",
            SyncPhase::LookupTags => "lookup tags",
            SyncPhase::CreateTags => "create tags",
            SyncPhase::ClearPivots => "clear pivots",
            SyncPhase::InsertPivots => "insert pivots",
            SyncPhase::Commit => "commit",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid input: {0}")]
    Invalid(&'static str),
    #[error("{phase} failed: {source}")]
    Phase {
        phase: SyncPhase,
        #[source]
        source: CoreError,
    },
    #[error("{phase} timed out after {after:?}")]
    Timeout { phase: SyncPhase, after: Duration },
    #[error("tag {name:?} did not resolve to an id in deck {deck_id}")]
    Unresolved { deck_id: DeckId, name: String },
}

impl SyncError {
    /// Phase the failure happened in, if it got past validation.
    pub fn phase(&self) -> Option<SyncPhase> {
        match self {
            SyncError::Invalid(_) => None,
            SyncError::Phase { phase, .. } | SyncError::Timeout { phase, .. } => Some(*phase),
            SyncError::Unresolved { .. } => Some(SyncPhase::InsertPivots),
        }
    }

    /// Whether the same call may succeed if retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum CardError {
    #[error(transparent)]
    Store(#[from] CoreError),
    #[error(transparent)]
    Tags(#[from] SyncError),
}
