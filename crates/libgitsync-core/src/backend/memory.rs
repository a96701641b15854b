//! In-memory [`VcsBackend`] for tests.
//!
//! One shared "remote" with a linear history and any number of local clones
//! keyed by path. Cloning the backend shares the same world, so a test can
//! hand one copy to the engine and keep another to mutate fixtures and
//! inspect the call journal.
//!
//! Every operation goes through a re-entrancy detector: a call that starts
//! while another one is still in flight fails and is counted in
//! [`MemoryBackend::reentrant_calls`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeZone, Utc};

use super::VcsBackend;
use crate::error::BackendError;
use crate::state::HEAD_REF;
use crate::types::{
    ChangeKind, ChangeRecord, Credentials, FetchOutcome, PullOutcome, RepositoryOptions,
    ResolvedCommit, WorktreeStatus,
};

/// Hash reported for the missing side of an added or deleted file
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000";

/// Backend operations, as recorded in the call journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    IsRepository,
    Clone,
    Open,
    Fetch,
    ResolveCommit,
    DiffTrees,
    WorktreeStatus,
    Pull,
    HardReset,
}

/// A commit in the in-memory history. `files` maps path to content hash.
#[derive(Debug, Clone)]
pub struct MemoryCommit {
    pub id: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
    pub files: BTreeMap<String, String>,
}

impl MemoryCommit {
    fn resolved(&self) -> ResolvedCommit {
        ResolvedCommit {
            id: self.id.clone(),
            timestamp: self.timestamp,
            message: self.message.clone(),
            author_name: self.author_name.clone(),
            author_email: self.author_email.clone(),
        }
    }
}

/// Linear commit history standing in for the remote repository
#[derive(Debug, Clone, Default)]
pub struct MemoryRepo {
    commits: Vec<MemoryCommit>,
}

impl MemoryRepo {
    /// Repository without any commit
    pub fn empty() -> Self {
        Self::default()
    }

    /// Repository with a single commit containing `README.md`
    pub fn with_commit(id: &str, message: &str) -> Self {
        let readme = format!("{}-readme", id);
        let mut repo = Self::empty();
        repo.commit(id, message, &[("README.md", readme.as_str())]);
        repo
    }

    /// Append a commit. Files with an empty content hash are deleted; every
    /// other file is carried over from the parent.
    pub fn commit(&mut self, id: &str, message: &str, files: &[(&str, &str)]) {
        let mut tree = self.head().map(|c| c.files.clone()).unwrap_or_default();
        for (path, content) in files {
            if content.is_empty() {
                tree.remove(*path);
            } else {
                tree.insert(path.to_string(), content.to_string());
            }
        }
        let seconds = 1_700_000_000 + self.commits.len() as i64 * 60;
        self.commits.push(MemoryCommit {
            id: id.to_string(),
            message: format!("{}\n", message),
            author_name: "Test Author".to_string(),
            author_email: "author@example.com".to_string(),
            timestamp: Utc.timestamp_opt(seconds, 0).single().unwrap_or_else(Utc::now),
            files: tree,
        });
    }

    pub fn head(&self) -> Option<&MemoryCommit> {
        self.commits.last()
    }

    fn find(&self, id: &str) -> Option<&MemoryCommit> {
        self.commits.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Default)]
struct LocalClone {
    head: Option<MemoryCommit>,
    tracking: Option<MemoryCommit>,
    dirty: usize,
}

#[derive(Debug, Default)]
struct World {
    remote: MemoryRepo,
    locals: HashMap<PathBuf, LocalClone>,
    calls: Vec<BackendOp>,
    failures: HashMap<BackendOp, String>,
}

/// Blocks the next call of one operation until the test releases it
struct Gate {
    op: BackendOp,
    entered: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

/// Test-side end of a gate installed with [`MemoryBackend::gate`]
pub struct GateHandle {
    entered: mpsc::Receiver<()>,
    release: mpsc::Sender<()>,
}

impl GateHandle {
    /// Block until the gated operation has started
    pub fn wait_entered(&self) {
        let _ = self.entered.recv();
    }

    /// Let the gated operation proceed
    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

/// Handle to a local clone
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    path: PathBuf,
}

/// In-memory backend shared between the engine under test and the test body
#[derive(Clone, Default)]
pub struct MemoryBackend {
    world: Arc<Mutex<World>>,
    gate: Arc<Mutex<Option<Gate>>>,
    in_flight: Arc<AtomicBool>,
    reentrant: Arc<AtomicUsize>,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl MemoryBackend {
    pub fn new(remote: MemoryRepo) -> Self {
        Self {
            world: Arc::new(Mutex::new(World {
                remote,
                ..World::default()
            })),
            ..Self::default()
        }
    }

    fn world(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a local clone at the configured path, in sync with the remote
    pub fn seed_local(&self, options: &RepositoryOptions) {
        let mut world = self.world();
        let head = world.remote.head().cloned();
        world.locals.insert(
            options.path().to_path_buf(),
            LocalClone {
                head: head.clone(),
                tracking: head,
                dirty: 0,
            },
        );
    }

    /// Append a commit to the remote history
    pub fn push_commit(&self, id: &str, message: &str, files: &[(&str, &str)]) {
        self.world().remote.commit(id, message, files);
    }

    /// Mark `entries` uncommitted modifications in the local clone at `path`
    pub fn dirty_local(&self, path: &Path, entries: usize) {
        if let Some(local) = self.world().locals.get_mut(path) {
            local.dirty = entries;
        }
    }

    /// Remove the local clone at `path`, as if the directory was deleted
    pub fn remove_local(&self, path: &Path) {
        self.world().locals.remove(path);
    }

    /// Make the next call of `op` fail with `message`
    pub fn fail_next(&self, op: BackendOp, message: &str) {
        self.world().failures.insert(op, message.to_string());
    }

    /// Block the next call of `op` until the returned handle releases it
    pub fn gate(&self, op: BackendOp) -> GateHandle {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = Some(Gate {
            op,
            entered: entered_tx,
            release: release_rx,
        });
        GateHandle {
            entered: entered_rx,
            release: release_tx,
        }
    }

    /// Every operation invoked so far, in order
    pub fn calls(&self) -> Vec<BackendOp> {
        self.world().calls.clone()
    }

    pub fn call_count(&self, op: BackendOp) -> usize {
        self.world().calls.iter().filter(|c| **c == op).count()
    }

    pub fn clear_calls(&self) {
        self.world().calls.clear();
    }

    /// Number of calls that started while another call was in flight
    pub fn reentrant_calls(&self) -> usize {
        self.reentrant.load(Ordering::SeqCst)
    }

    /// Commit id checked out in the local clone at `path`
    pub fn local_head(&self, path: &Path) -> Option<String> {
        self.world()
            .locals
            .get(path)
            .and_then(|l| l.head.as_ref().map(|c| c.id.clone()))
    }

    pub fn local_dirty(&self, path: &Path) -> usize {
        self.world().locals.get(path).map(|l| l.dirty).unwrap_or(0)
    }

    fn enter(&self, op: BackendOp) -> Result<InFlight<'_>, BackendError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.reentrant.fetch_add(1, Ordering::SeqCst);
            return Err(BackendError::Vcs(format!(
                "{:?} called while another backend call is in flight",
                op
            )));
        }
        let guard = InFlight(&self.in_flight);

        let failure = {
            let mut world = self.world();
            world.calls.push(op);
            world.failures.remove(&op)
        };

        let gate = {
            let mut slot = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(g) if g.op == op => slot.take(),
                _ => None,
            }
        };
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
        }

        match failure {
            Some(message) => Err(BackendError::Vcs(message)),
            None => Ok(guard),
        }
    }

    fn with_local<T>(
        &self,
        handle: &MemoryHandle,
        f: impl FnOnce(&MemoryRepo, &mut LocalClone) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let mut world = self.world();
        let World { remote, locals, .. } = &mut *world;
        let local = locals
            .get_mut(&handle.path)
            .ok_or_else(|| BackendError::NotARepository(handle.path.clone()))?;
        f(remote, local)
    }
}

impl VcsBackend for MemoryBackend {
    type Handle = MemoryHandle;

    fn is_repository(&self, path: &Path) -> bool {
        let Ok(_guard) = self.enter(BackendOp::IsRepository) else {
            return false;
        };
        self.world().locals.contains_key(path)
    }

    fn clone_repo(
        &self,
        _url: &str,
        path: &Path,
        _branch: &str,
        _remote_name: &str,
        _credentials: &Credentials,
    ) -> Result<MemoryHandle, BackendError> {
        let _guard = self.enter(BackendOp::Clone)?;
        let mut world = self.world();
        if world.locals.contains_key(path) {
            return Err(BackendError::AlreadyExists(path.to_path_buf()));
        }
        let head = world.remote.head().cloned();
        world.locals.insert(
            path.to_path_buf(),
            LocalClone {
                head: head.clone(),
                tracking: head,
                dirty: 0,
            },
        );
        Ok(MemoryHandle {
            path: path.to_path_buf(),
        })
    }

    fn open(&self, path: &Path) -> Result<MemoryHandle, BackendError> {
        let _guard = self.enter(BackendOp::Open)?;
        if self.world().locals.contains_key(path) {
            Ok(MemoryHandle {
                path: path.to_path_buf(),
            })
        } else {
            Err(BackendError::NotARepository(path.to_path_buf()))
        }
    }

    fn fetch(
        &self,
        handle: &MemoryHandle,
        _remote_name: &str,
        _branch: &str,
        _credentials: &Credentials,
        _force: bool,
    ) -> Result<FetchOutcome, BackendError> {
        let _guard = self.enter(BackendOp::Fetch)?;
        self.with_local(handle, |remote, local| {
            let remote_head = remote.head().cloned();
            let unchanged = remote_head.as_ref().map(|c| &c.id)
                == local.tracking.as_ref().map(|c| &c.id);
            local.tracking = remote_head;
            Ok(if unchanged {
                FetchOutcome::UpToDate
            } else {
                FetchOutcome::Updated
            })
        })
    }

    fn resolve_commit(
        &self,
        handle: &MemoryHandle,
        reference: &str,
    ) -> Result<ResolvedCommit, BackendError> {
        let _guard = self.enter(BackendOp::ResolveCommit)?;
        self.with_local(handle, |_, local| {
            let commit = if reference == HEAD_REF {
                local.head.as_ref()
            } else if reference.starts_with("refs/remotes/") {
                local.tracking.as_ref()
            } else {
                None
            };
            commit
                .map(MemoryCommit::resolved)
                .ok_or_else(|| BackendError::ReferenceNotFound(reference.to_string()))
        })
    }

    fn diff_trees(
        &self,
        handle: &MemoryHandle,
        from_commit: &str,
        to_commit: &str,
    ) -> Result<Vec<ChangeRecord>, BackendError> {
        let _guard = self.enter(BackendOp::DiffTrees)?;
        self.with_local(handle, |remote, _| {
            let from = remote
                .find(from_commit)
                .ok_or_else(|| BackendError::Vcs(format!("object not found: {}", from_commit)))?;
            let to = remote
                .find(to_commit)
                .ok_or_else(|| BackendError::Vcs(format!("object not found: {}", to_commit)))?;

            let mut changes = Vec::new();
            for (path, old) in &from.files {
                match to.files.get(path) {
                    Some(new) if new != old => {
                        changes.push(ChangeRecord::new(ChangeKind::Modified, path, old, new))
                    }
                    Some(_) => {}
                    None => changes.push(ChangeRecord::new(ChangeKind::Deleted, path, old, ZERO_HASH)),
                }
            }
            for (path, new) in &to.files {
                if !from.files.contains_key(path) {
                    changes.push(ChangeRecord::new(ChangeKind::Added, path, ZERO_HASH, new));
                }
            }
            Ok(changes)
        })
    }

    fn worktree_status(&self, handle: &MemoryHandle) -> Result<WorktreeStatus, BackendError> {
        let _guard = self.enter(BackendOp::WorktreeStatus)?;
        self.with_local(handle, |_, local| {
            Ok(match local.dirty {
                0 => WorktreeStatus::Clean,
                n => WorktreeStatus::Dirty(n),
            })
        })
    }

    fn pull(
        &self,
        handle: &MemoryHandle,
        _remote_name: &str,
        _branch: &str,
        _credentials: &Credentials,
        _force: bool,
    ) -> Result<PullOutcome, BackendError> {
        let _guard = self.enter(BackendOp::Pull)?;
        self.with_local(handle, |_, local| {
            let unchanged = local.head.as_ref().map(|c| &c.id)
                == local.tracking.as_ref().map(|c| &c.id);
            // Untracked edits survive a checkout, as they do in git
            local.head = local.tracking.clone();
            Ok(if unchanged {
                PullOutcome::UpToDate
            } else {
                PullOutcome::Updated
            })
        })
    }

    fn hard_reset(&self, handle: &MemoryHandle) -> Result<(), BackendError> {
        let _guard = self.enter(BackendOp::HardReset)?;
        self.with_local(handle, |_, local| {
            local.dirty = 0;
            Ok(())
        })
    }
}
