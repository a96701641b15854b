//! Data model shared by the engine, the backends and the monitoring readers.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default remote name used when none is configured
pub const DEFAULT_REMOTE_NAME: &str = "origin";

/// Connection options for the synchronized repository.
///
/// Built once at startup from validated configuration and never mutated
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryOptions {
    url: String,
    branch: String,
    path: PathBuf,
    user: String,
    token: String,
    remote_name: String,
}

impl RepositoryOptions {
    pub fn new(
        url: impl Into<String>,
        branch: impl Into<String>,
        path: impl Into<PathBuf>,
        user: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
            path: path.into(),
            user: user.into(),
            token: token.into(),
            remote_name: DEFAULT_REMOTE_NAME.to_string(),
        }
    }

    /// Override the remote name (defaults to `origin`)
    pub fn with_remote_name(mut self, remote_name: impl Into<String>) -> Self {
        self.remote_name = remote_name.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    /// Credentials derived from the configured user and token
    pub fn credentials(&self) -> Credentials {
        Credentials {
            user: self.user.clone(),
            token: self.token.clone(),
        }
    }

    /// Name of the remote-tracking reference for the configured branch,
    /// e.g. `refs/remotes/origin/master`
    pub fn tracking_ref(&self) -> String {
        format!("refs/remotes/{}/{}", self.remote_name, self.branch)
    }
}

/// Authentication material handed to the backend for network operations
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub token: String,
}

impl Credentials {
    /// True when a token was configured
    pub fn is_set(&self) -> bool {
        !self.token.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("token", &if self.token.is_empty() { "" } else { "***" })
            .finish()
    }
}

/// Kind of a file-level change between two trees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed => "renamed",
        };
        f.write_str(s)
    }
}

/// One file-level delta produced by a tree comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub path: String,
    /// Content hash on the source side (all zeros when added)
    pub from_hash: String,
    /// Content hash on the destination side (all zeros when deleted)
    pub to_hash: String,
}

impl ChangeRecord {
    pub fn new(
        kind: ChangeKind,
        path: impl Into<String>,
        from_hash: impl Into<String>,
        to_hash: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
            from_hash: from_hash.into(),
            to_hash: to_hash.into(),
        }
    }
}

/// Why a snapshot was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncReason {
    /// First acquisition of the repository (or a fresh clone)
    Init,
    /// Local working tree was dirty and got reset
    Local,
    /// Remote branch moved and was force-pulled
    Remote,
}

impl SyncReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncReason::Init => "init",
            SyncReason::Local => "local",
            SyncReason::Remote => "remote",
        }
    }
}

impl fmt::Display for SyncReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commit metadata as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommit {
    /// Full object id
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
}

/// The commit the repository state currently treats as authoritative
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitSnapshot {
    pub hash: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub reason: SyncReason,
    pub changes: Vec<ChangeRecord>,
}

impl CommitSnapshot {
    /// Build a complete snapshot from a resolved commit
    pub fn from_commit(commit: ResolvedCommit, reason: SyncReason, changes: Vec<ChangeRecord>) -> Self {
        Self {
            hash: commit.id,
            timestamp: commit.timestamp,
            message: commit.message.trim().to_string(),
            author_name: commit.author_name,
            author_email: commit.author_email,
            reason,
            changes,
        }
    }

    /// Abbreviated hash for log lines
    pub fn short_hash(&self) -> &str {
        let end = self.hash.len().min(8);
        &self.hash[..end]
    }
}

/// Result of a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    UpToDate,
    Updated,
}

/// Result of a force-pull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    UpToDate,
    Updated,
}

/// Working tree cleanliness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorktreeStatus {
    Clean,
    /// Number of modified, deleted or untracked entries
    Dirty(usize),
}

impl WorktreeStatus {
    pub fn is_clean(&self) -> bool {
        matches!(self, WorktreeStatus::Clean)
    }
}
