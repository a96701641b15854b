//! Thread-safe holder of what the daemon currently knows about the repository.
//!
//! The sync engine is the only writer. Monitoring readers (metrics, status
//! endpoint) call the read accessors from other threads at any time; every
//! read returns an owned copy.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::backend::VcsBackend;
use crate::error::StateError;
use crate::types::{ChangeRecord, CommitSnapshot, RepositoryOptions, SyncReason};

/// Reference resolved when recording a snapshot
pub const HEAD_REF: &str = "HEAD";

#[derive(Debug, Default)]
struct Inner {
    snapshot: Option<CommitSnapshot>,
    has_changes: bool,
}

/// Lock-guarded repository state
#[derive(Debug)]
pub struct RepositoryState {
    /// Immutable after construction, so reads need no lock
    options: RepositoryOptions,
    inner: Mutex<Inner>,
}

impl RepositoryState {
    pub fn new(options: RepositoryOptions) -> Self {
        Self {
            options,
            inner: Mutex::new(Inner::default()),
        }
    }

    // Snapshots are replaced wholesale, so a writer that panicked cannot have
    // left a partial value behind.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clear the changed flag. Called once at the start of every cycle.
    pub fn reset(&self) {
        self.lock().has_changes = false;
    }

    /// Flag that this cycle detected a change. Idempotent.
    pub fn mark_changed(&self) {
        self.lock().has_changes = true;
    }

    /// Resolve local HEAD through the backend and install it as the current
    /// snapshot.
    ///
    /// The backend call happens outside the lock; only the fully built
    /// snapshot is swapped in.
    pub fn store_snapshot<B: VcsBackend>(
        &self,
        backend: &B,
        handle: &B::Handle,
        reason: SyncReason,
        changes: Vec<ChangeRecord>,
    ) -> Result<CommitSnapshot, StateError> {
        let commit = backend
            .resolve_commit(handle, HEAD_REF)
            .map_err(|source| StateError::NoCommit {
                reference: HEAD_REF.to_string(),
                source,
            })?;
        let snapshot = CommitSnapshot::from_commit(commit, reason, changes);
        self.lock().snapshot = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Copy of the current snapshot
    pub fn snapshot(&self) -> Result<CommitSnapshot, StateError> {
        self.lock().snapshot.clone().ok_or(StateError::NotAvailable)
    }

    pub fn has_changes(&self) -> bool {
        self.lock().has_changes
    }

    pub fn options(&self) -> RepositoryOptions {
        self.options.clone()
    }

    /// Borrow the options without cloning
    pub fn options_ref(&self) -> &RepositoryOptions {
        &self.options
    }
}
