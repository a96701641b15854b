use std::path::PathBuf;

use libgitsync_core::BackendError;
use thiserror::Error;

/// Errors that can occur during git operations
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("repository already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("not a git repository: {}", .0.display())]
    NotARepository(PathBuf),

    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    #[error("remote {0} is not configured")]
    RemoteNotFound(String),
}

impl GitError {
    /// Attach `path` to git2 errors that mean "something is already there"
    pub(crate) fn on_clone(err: git2::Error, path: PathBuf) -> Self {
        match err.code() {
            git2::ErrorCode::Exists => GitError::AlreadyExists(path),
            _ => GitError::Git(err),
        }
    }

    pub(crate) fn on_open(err: git2::Error, path: PathBuf) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => GitError::NotARepository(path),
            _ => GitError::Git(err),
        }
    }

    pub(crate) fn on_lookup(err: git2::Error, reference: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound | git2::ErrorCode::UnbornBranch => {
                GitError::ReferenceNotFound(reference.to_string())
            }
            _ => GitError::Git(err),
        }
    }
}

impl From<GitError> for BackendError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::AlreadyExists(path) => BackendError::AlreadyExists(path),
            GitError::NotARepository(path) => BackendError::NotARepository(path),
            GitError::ReferenceNotFound(name) => BackendError::ReferenceNotFound(name),
            GitError::Io(e) => BackendError::Io(e),
            GitError::Git(e) => BackendError::Vcs(e.message().to_string()),
            other @ GitError::RemoteNotFound(_) => BackendError::Vcs(other.to_string()),
        }
    }
}
