//! Capability interface over the version-control library.
//!
//! The sync engine is written only against [`VcsBackend`]. The git2 adapter
//! lives in `libgitsync-git`; [`memory::MemoryBackend`] is an in-memory double
//! for deterministic tests.

pub mod memory;

use std::path::Path;

use crate::error::BackendError;
use crate::types::{
    ChangeRecord, Credentials, FetchOutcome, PullOutcome, ResolvedCommit, WorktreeStatus,
};

/// Operations the sync engine needs from a version-control library.
///
/// All calls are blocking. Implementations must be `Send` so the engine can
/// run on a blocking worker thread.
pub trait VcsBackend: Send + 'static {
    /// Open repository handle. Dropped at the end of every cycle.
    type Handle;

    /// Whether `path` holds a repository (directory plus repository marker)
    fn is_repository(&self, path: &Path) -> bool;

    /// Clone `url` into `path`, checking out `branch`.
    ///
    /// Returns [`BackendError::AlreadyExists`] when a repository is already
    /// there.
    fn clone_repo(
        &self,
        url: &str,
        path: &Path,
        branch: &str,
        remote_name: &str,
        credentials: &Credentials,
    ) -> Result<Self::Handle, BackendError>;

    fn open(&self, path: &Path) -> Result<Self::Handle, BackendError>;

    /// Fetch `branch` from `remote_name` into its remote-tracking ref
    fn fetch(
        &self,
        handle: &Self::Handle,
        remote_name: &str,
        branch: &str,
        credentials: &Credentials,
        force: bool,
    ) -> Result<FetchOutcome, BackendError>;

    /// Resolve a reference (`HEAD`, `refs/remotes/origin/main`, ...) to a commit
    fn resolve_commit(
        &self,
        handle: &Self::Handle,
        reference: &str,
    ) -> Result<ResolvedCommit, BackendError>;

    /// File-level differences between the trees of two commits
    fn diff_trees(
        &self,
        handle: &Self::Handle,
        from_commit: &str,
        to_commit: &str,
    ) -> Result<Vec<ChangeRecord>, BackendError>;

    fn worktree_status(&self, handle: &Self::Handle) -> Result<WorktreeStatus, BackendError>;

    /// Move the local branch to the remote-tracking commit, overwriting local
    /// history when `force` is set
    fn pull(
        &self,
        handle: &Self::Handle,
        remote_name: &str,
        branch: &str,
        credentials: &Credentials,
        force: bool,
    ) -> Result<PullOutcome, BackendError>;

    /// Discard every working-tree modification, returning it to HEAD
    fn hard_reset(&self, handle: &Self::Handle) -> Result<(), BackendError>;
}
