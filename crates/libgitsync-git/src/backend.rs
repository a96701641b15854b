//! [`VcsBackend`] on top of libgit2

use std::path::Path;

use chrono::{TimeZone, Utc};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Delta, DiffFindOptions, ObjectType, Oid, Repository, ResetType, StatusOptions};
use libgitsync_core::{
    BackendError, ChangeKind, ChangeRecord, Credentials, FetchOutcome, PullOutcome,
    ResolvedCommit, VcsBackend, WorktreeStatus,
};
use tracing::debug;

use crate::error::GitError;
use crate::remote::{branch_ref, fetch_options, fetch_refspec};

const REFLOG_PULL: &str = "gitsync: force pull";

/// Real backend. Stateless; every cycle opens a fresh [`Repository`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Git2Backend;

impl Git2Backend {
    pub fn new() -> Self {
        Self
    }

    fn clone_inner(
        url: &str,
        path: &Path,
        branch: &str,
        remote_name: &str,
        credentials: &Credentials,
    ) -> Result<Repository, GitError> {
        if path.join(".git").exists() {
            return Err(GitError::AlreadyExists(path.to_path_buf()));
        }

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_options(credentials));
        if !branch.is_empty() {
            builder.branch(branch);
        }
        let remote_name = remote_name.to_string();
        builder.remote_create(move |repo, _name, url| repo.remote(&remote_name, url));

        builder
            .clone(url, path)
            .map_err(|e| GitError::on_clone(e, path.to_path_buf()))
    }

    fn fetch_inner(
        repo: &Repository,
        remote_name: &str,
        branch: &str,
        credentials: &Credentials,
    ) -> Result<FetchOutcome, GitError> {
        let tracking = format!("refs/remotes/{}/{}", remote_name, branch);
        let before = repo.refname_to_id(&tracking).ok();

        let mut remote = repo
            .find_remote(remote_name)
            .map_err(|_| GitError::RemoteNotFound(remote_name.to_string()))?;
        let refspec = fetch_refspec(remote_name, branch);
        let mut options = fetch_options(credentials);
        remote.fetch(&[refspec.as_str()], Some(&mut options), None)?;

        let after = repo
            .refname_to_id(&tracking)
            .map_err(|e| GitError::on_lookup(e, &tracking))?;
        debug!(remote = remote_name, %after, "fetched {}", tracking);

        Ok(if before == Some(after) {
            FetchOutcome::UpToDate
        } else {
            FetchOutcome::Updated
        })
    }

    fn resolve_inner(repo: &Repository, reference: &str) -> Result<ResolvedCommit, GitError> {
        let commit = repo
            .revparse_single(reference)
            .and_then(|object| object.peel_to_commit())
            .map_err(|e| GitError::on_lookup(e, reference))?;
        let author = commit.author();
        let seconds = commit.time().seconds();

        Ok(ResolvedCommit {
            id: commit.id().to_string(),
            timestamp: Utc
                .timestamp_opt(seconds, 0)
                .single()
                .unwrap_or_default(),
            message: commit.message().unwrap_or_default().to_string(),
            author_name: author.name().unwrap_or_default().to_string(),
            author_email: author.email().unwrap_or_default().to_string(),
        })
    }

    fn diff_inner(repo: &Repository, from: &str, to: &str) -> Result<Vec<ChangeRecord>, GitError> {
        let from_tree = repo.find_commit(Oid::from_str(from)?)?.tree()?;
        let to_tree = repo.find_commit(Oid::from_str(to)?)?.tree()?;

        let mut diff = repo.diff_tree_to_tree(Some(&from_tree), Some(&to_tree), None)?;
        let mut find = DiffFindOptions::new();
        find.renames(true);
        diff.find_similar(Some(&mut find))?;

        let changes = diff
            .deltas()
            .filter_map(|delta| {
                let kind = match delta.status() {
                    Delta::Added | Delta::Copied => ChangeKind::Added,
                    Delta::Deleted => ChangeKind::Deleted,
                    Delta::Modified | Delta::Typechange => ChangeKind::Modified,
                    Delta::Renamed => ChangeKind::Renamed,
                    _ => return None,
                };
                let file = if kind == ChangeKind::Deleted {
                    delta.old_file()
                } else {
                    delta.new_file()
                };
                let path = file.path()?.to_string_lossy().into_owned();
                Some(ChangeRecord::new(
                    kind,
                    path,
                    delta.old_file().id().to_string(),
                    delta.new_file().id().to_string(),
                ))
            })
            .collect();
        Ok(changes)
    }

    fn status_inner(repo: &Repository) -> Result<WorktreeStatus, GitError> {
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let entries = repo.statuses(Some(&mut options))?.len();

        Ok(if entries == 0 {
            WorktreeStatus::Clean
        } else {
            WorktreeStatus::Dirty(entries)
        })
    }

    fn pull_inner(
        repo: &Repository,
        remote_name: &str,
        branch: &str,
        credentials: &Credentials,
        force: bool,
    ) -> Result<PullOutcome, GitError> {
        Self::fetch_inner(repo, remote_name, branch, credentials)?;

        let tracking = format!("refs/remotes/{}/{}", remote_name, branch);
        let target = repo
            .refname_to_id(&tracking)
            .map_err(|e| GitError::on_lookup(e, &tracking))?;
        let current = repo.head().ok().and_then(|head| head.target());
        if current == Some(target) {
            return Ok(PullOutcome::UpToDate);
        }

        let local_branch = branch_ref(branch);
        repo.reference(&local_branch, target, force, REFLOG_PULL)?;
        repo.set_head(&local_branch)?;

        let object = repo.find_object(target, Some(ObjectType::Commit))?;
        let mut checkout = CheckoutBuilder::new();
        if force {
            checkout.force();
        }
        repo.reset(&object, ResetType::Hard, Some(&mut checkout))?;
        debug!(branch, %target, "moved {} to {}", local_branch, tracking);

        Ok(PullOutcome::Updated)
    }

    fn reset_inner(repo: &Repository) -> Result<(), GitError> {
        let head = repo
            .head()
            .and_then(|head| head.peel(ObjectType::Commit))
            .map_err(|e| GitError::on_lookup(e, "HEAD"))?;
        repo.reset(&head, ResetType::Hard, None)?;

        // reset only restores tracked paths
        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        repo.checkout_head(Some(&mut checkout))?;
        Ok(())
    }
}

impl VcsBackend for Git2Backend {
    type Handle = Repository;

    fn is_repository(&self, path: &Path) -> bool {
        path.is_dir() && path.join(".git").exists()
    }

    fn clone_repo(
        &self,
        url: &str,
        path: &Path,
        branch: &str,
        remote_name: &str,
        credentials: &Credentials,
    ) -> Result<Repository, BackendError> {
        Ok(Self::clone_inner(url, path, branch, remote_name, credentials)?)
    }

    fn open(&self, path: &Path) -> Result<Repository, BackendError> {
        Ok(Repository::open(path).map_err(|e| GitError::on_open(e, path.to_path_buf()))?)
    }

    fn fetch(
        &self,
        handle: &Repository,
        remote_name: &str,
        branch: &str,
        credentials: &Credentials,
        _force: bool,
    ) -> Result<FetchOutcome, BackendError> {
        Ok(Self::fetch_inner(handle, remote_name, branch, credentials)?)
    }

    fn resolve_commit(
        &self,
        handle: &Repository,
        reference: &str,
    ) -> Result<ResolvedCommit, BackendError> {
        Ok(Self::resolve_inner(handle, reference)?)
    }

    fn diff_trees(
        &self,
        handle: &Repository,
        from_commit: &str,
        to_commit: &str,
    ) -> Result<Vec<ChangeRecord>, BackendError> {
        Ok(Self::diff_inner(handle, from_commit, to_commit)?)
    }

    fn worktree_status(&self, handle: &Repository) -> Result<WorktreeStatus, BackendError> {
        Ok(Self::status_inner(handle)?)
    }

    fn pull(
        &self,
        handle: &Repository,
        remote_name: &str,
        branch: &str,
        credentials: &Credentials,
        force: bool,
    ) -> Result<PullOutcome, BackendError> {
        Ok(Self::pull_inner(handle, remote_name, branch, credentials, force)?)
    }

    fn hard_reset(&self, handle: &Repository) -> Result<(), BackendError> {
        Ok(Self::reset_inner(handle)?)
    }
}
