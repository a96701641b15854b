use std::path::PathBuf;

use thiserror::Error;

/// Errors reported by a VCS backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("repository already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Vcs(String),
}

/// Errors raised by [`crate::RepositoryState`]
#[derive(Debug, Error)]
pub enum StateError {
    /// HEAD could not be resolved, e.g. an empty repository
    #[error("no commit at {reference}: {source}")]
    NoCommit {
        reference: String,
        #[source]
        source: BackendError,
    },

    /// No snapshot has been recorded yet
    #[error("commit snapshot not available yet")]
    NotAvailable,
}

/// Underlying cause of a failed stage
#[derive(Debug, Error)]
pub enum StageFault {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Stages of a synchronization cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Acquiring,
    Fetching,
    ComparingRemote,
    Integrating,
    ComparingLocal,
    Reconciling,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::Acquiring => "acquiring",
            SyncStage::Fetching => "fetching",
            SyncStage::ComparingRemote => "comparing_remote",
            SyncStage::Integrating => "integrating",
            SyncStage::ComparingLocal => "comparing_local",
            SyncStage::Reconciling => "reconciling",
        }
    }
}

/// Cycle-scoped synchronization failures. Each aborts the current cycle only.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to acquire repository at {}: {source}", path.display())]
    Acquisition {
        path: PathBuf,
        #[source]
        source: BackendError,
    },

    #[error("failed to fetch from {remote}: {source}")]
    Fetch {
        remote: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to compare local and remote trees: {0}")]
    Compare(#[source] StageFault),

    #[error("failed to pull remote changes: {0}")]
    Integrate(#[source] StageFault),

    /// Status check (`ComparingLocal`) or reset (`Reconciling`) failure
    #[error("failed to reconcile working tree: {source}")]
    Reconcile {
        stage: SyncStage,
        #[source]
        source: StageFault,
    },
}

impl SyncError {
    /// Stage the cycle was in when it failed
    pub fn stage(&self) -> SyncStage {
        match self {
            SyncError::Acquisition { .. } => SyncStage::Acquiring,
            SyncError::Fetch { .. } => SyncStage::Fetching,
            SyncError::Compare(_) => SyncStage::ComparingRemote,
            SyncError::Integrate(_) => SyncStage::Integrating,
            SyncError::Reconcile { stage, .. } => *stage,
        }
    }

    /// Stable identifier for logs and metrics
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Acquisition { .. } => "acquisition_error",
            SyncError::Fetch { .. } => "fetch_error",
            SyncError::Compare(_) => "compare_error",
            SyncError::Integrate(_) => "integrate_error",
            SyncError::Reconcile { .. } => "reconcile_error",
        }
    }
}

/// Errors that stop the scheduler loop
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The blocking task running a cycle panicked or was cancelled,
    /// taking the engine with it
    #[error("sync cycle {cycle} did not complete: {message}")]
    CycleLost { cycle: u64, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_codes_and_stages() {
        let err = SyncError::Fetch {
            remote: "origin".to_string(),
            source: BackendError::Vcs("connection refused".to_string()),
        };
        assert_eq!(err.code(), "fetch_error");
        assert_eq!(err.stage(), SyncStage::Fetching);
        assert_eq!(
            err.to_string(),
            "failed to fetch from origin: connection refused"
        );

        let err = SyncError::Reconcile {
            stage: SyncStage::Reconciling,
            source: StageFault::Backend(BackendError::Vcs("locked".into())),
        };
        assert_eq!(err.stage().as_str(), "reconciling");
        assert_eq!(err.code(), "reconcile_error");
        assert_eq!(err.to_string(), "failed to reconcile working tree: locked");

        let err = SyncError::Reconcile {
            stage: SyncStage::ComparingLocal,
            source: StageFault::Backend(BackendError::Vcs("index unreadable".into())),
        };
        assert_eq!(err.stage().as_str(), "comparing_local");
    }

    #[test]
    fn test_no_commit_wraps_backend_error() {
        let err = StateError::NoCommit {
            reference: "HEAD".to_string(),
            source: BackendError::ReferenceNotFound("HEAD".to_string()),
        };
        assert_eq!(err.to_string(), "no commit at HEAD: reference not found: HEAD");
    }
}
