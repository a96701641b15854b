//! One reconciliation cycle between the local clone and the remote branch.
//!
//! Stages run strictly in order:
//!
//! ```text
//! Acquiring -> Fetching -> ComparingRemote -> [Integrating]
//!           -> ComparingLocal -> [Reconciling] -> Done
//! ```
//!
//! A failing stage aborts the current cycle only. Whatever the earlier stages
//! already wrote to [`RepositoryState`] stays; the next trigger starts over
//! from Acquiring.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::backend::VcsBackend;
use crate::error::{BackendError, SyncError, SyncStage};
use crate::metrics::SyncMetrics;
use crate::state::{RepositoryState, HEAD_REF};
use crate::types::{FetchOutcome, RepositoryOptions, SyncReason, WorktreeStatus};

/// What a successful cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// The local clone was (re)created this cycle
    pub cloned: bool,
    /// The fetch brought in new objects
    pub fetched: bool,
    /// Number of file-level changes between local HEAD and the remote branch
    pub remote_changes: usize,
    /// Number of dirty working-tree entries that were discarded
    pub discarded_entries: usize,
    /// Reason of the last snapshot recorded this cycle
    pub recorded: Option<SyncReason>,
}

/// Result of [`SyncEngine::sync`]
#[derive(Debug)]
pub struct CycleReport {
    /// 1-based cycle number
    pub cycle: u64,
    /// `has_changes` as left by this cycle
    pub changed: bool,
    pub duration: Duration,
    pub result: Result<CycleOutcome, SyncError>,
}

impl CycleReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Drives the backend through one cycle at a time and records the outcome in
/// the shared [`RepositoryState`] and [`SyncMetrics`].
pub struct SyncEngine<B: VcsBackend> {
    backend: B,
    state: Arc<RepositoryState>,
    metrics: Arc<SyncMetrics>,
    acquired_once: bool,
    cycles: u64,
}

impl<B: VcsBackend> SyncEngine<B> {
    /// Create an engine without touching the repository
    pub fn new(backend: B, options: RepositoryOptions, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            backend,
            state: Arc::new(RepositoryState::new(options)),
            metrics,
            acquired_once: false,
            cycles: 0,
        }
    }

    /// Create an engine and run the first cycle.
    ///
    /// Fails when the repository cannot be acquired: without a usable local
    /// clone there is nothing to keep in sync. Failures in later stages of
    /// the first cycle are logged and counted like any other cycle.
    pub fn start(
        backend: B,
        options: RepositoryOptions,
        metrics: Arc<SyncMetrics>,
    ) -> Result<Self, SyncError> {
        let mut engine = Self::new(backend, options, metrics);
        let report = engine.sync();
        match report.result {
            Err(err @ SyncError::Acquisition { .. }) => Err(err),
            _ => Ok(engine),
        }
    }

    /// Shared state for monitoring readers
    pub fn state(&self) -> Arc<RepositoryState> {
        Arc::clone(&self.state)
    }

    pub fn metrics(&self) -> Arc<SyncMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of cycles run so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run exactly one cycle
    pub fn sync(&mut self) -> CycleReport {
        self.cycles += 1;
        let cycle = self.cycles;
        let started = Instant::now();

        self.state.reset();
        debug!(cycle, "sync cycle started");

        let result = self.run_cycle(cycle);
        let duration = started.elapsed();
        let changed = self.state.has_changes();

        match &result {
            Ok(outcome) => info!(
                cycle,
                changed,
                cloned = outcome.cloned,
                remote_changes = outcome.remote_changes,
                discarded = outcome.discarded_entries,
                duration_ms = duration.as_millis() as u64,
                "sync cycle finished"
            ),
            Err(e) => error!(
                cycle,
                stage = e.stage().as_str(),
                code = e.code(),
                changed,
                "sync cycle failed: {}",
                e
            ),
        }
        self.metrics.record_cycle(changed, result.is_err(), duration);

        CycleReport {
            cycle,
            changed,
            duration,
            result,
        }
    }

    fn run_cycle(&mut self, cycle: u64) -> Result<CycleOutcome, SyncError> {
        let options = self.state.options();
        let mut outcome = CycleOutcome::default();

        let handle = self.acquire(&options, &mut outcome)?;
        self.fetch(&handle, &options, &mut outcome)?;
        self.compare_remote(cycle, &handle, &options, &mut outcome)?;
        self.compare_local(&handle, &mut outcome)?;

        Ok(outcome)
    }

    /// Open the local clone, cloning it first when it is missing
    fn acquire(
        &mut self,
        options: &RepositoryOptions,
        outcome: &mut CycleOutcome,
    ) -> Result<B::Handle, SyncError> {
        let path = options.path();
        let acquisition = |source| SyncError::Acquisition {
            path: path.to_path_buf(),
            source,
        };

        let handle = if self.backend.is_repository(path) {
            self.backend.open(path).map_err(acquisition)?
        } else {
            info!(url = options.url(), path = %path.display(), "cloning repository");
            match self.backend.clone_repo(
                options.url(),
                path,
                options.branch(),
                options.remote_name(),
                &options.credentials(),
            ) {
                Ok(handle) => {
                    outcome.cloned = true;
                    handle
                }
                Err(BackendError::AlreadyExists(_)) => {
                    debug!(path = %path.display(), "repository already exists, opening");
                    self.backend.open(path).map_err(acquisition)?
                }
                Err(e) => return Err(acquisition(e)),
            }
        };

        let first = !self.acquired_once;
        self.acquired_once = true;

        if outcome.cloned {
            self.state.mark_changed();
        }
        if first || outcome.cloned {
            match self
                .state
                .store_snapshot(&self.backend, &handle, SyncReason::Init, Vec::new())
            {
                Ok(snapshot) => {
                    outcome.recorded = Some(SyncReason::Init);
                    info!(hash = snapshot.short_hash(), "recorded initial commit");
                }
                // An empty remote has no HEAD yet; later cycles pick it up.
                Err(e) => warn!("no initial commit recorded: {}", e),
            }
        }

        Ok(handle)
    }

    fn fetch(
        &self,
        handle: &B::Handle,
        options: &RepositoryOptions,
        outcome: &mut CycleOutcome,
    ) -> Result<(), SyncError> {
        let fetched = self
            .backend
            .fetch(
                handle,
                options.remote_name(),
                options.branch(),
                &options.credentials(),
                true,
            )
            .map_err(|source| SyncError::Fetch {
                remote: options.remote_name().to_string(),
                source,
            })?;

        outcome.fetched = fetched == FetchOutcome::Updated;
        if outcome.fetched {
            debug!(remote = options.remote_name(), "fetched new objects");
        } else {
            debug!(remote = options.remote_name(), "already up to date");
        }
        Ok(())
    }

    /// Diff local HEAD against the remote-tracking branch and force-pull when
    /// they differ. Remote always wins.
    fn compare_remote(
        &self,
        cycle: u64,
        handle: &B::Handle,
        options: &RepositoryOptions,
        outcome: &mut CycleOutcome,
    ) -> Result<(), SyncError> {
        let tracking_ref = options.tracking_ref();
        let local = self
            .backend
            .resolve_commit(handle, HEAD_REF)
            .map_err(|e| SyncError::Compare(e.into()))?;
        let remote = self
            .backend
            .resolve_commit(handle, &tracking_ref)
            .map_err(|e| SyncError::Compare(e.into()))?;
        let changes = self
            .backend
            .diff_trees(handle, &local.id, &remote.id)
            .map_err(|e| SyncError::Compare(e.into()))?;

        if changes.is_empty() {
            debug!(hash = %local.id, "local tree matches {}", tracking_ref);
            return Ok(());
        }

        info!(
            cycle,
            count = changes.len(),
            from = %local.id,
            to = %remote.id,
            "remote changes detected"
        );
        for change in &changes {
            debug!(
                kind = %change.kind,
                path = %change.path,
                "{} -> {}",
                change.from_hash,
                change.to_hash
            );
        }

        outcome.remote_changes = changes.len();
        self.state.mark_changed();

        self.backend
            .pull(
                handle,
                options.remote_name(),
                options.branch(),
                &options.credentials(),
                true,
            )
            .map_err(|e| SyncError::Integrate(e.into()))?;
        let snapshot = self
            .state
            .store_snapshot(&self.backend, handle, SyncReason::Remote, changes)
            .map_err(|e| SyncError::Integrate(e.into()))?;
        outcome.recorded = Some(SyncReason::Remote);
        info!(hash = snapshot.short_hash(), reason = %snapshot.reason, "pulled remote commit");

        Ok(())
    }

    /// Discard local working-tree modifications. Local never wins.
    fn compare_local(&self, handle: &B::Handle, outcome: &mut CycleOutcome) -> Result<(), SyncError> {
        let status = self
            .backend
            .worktree_status(handle)
            .map_err(|e| SyncError::Reconcile {
                stage: SyncStage::ComparingLocal,
                source: e.into(),
            })?;

        let entries = match status {
            WorktreeStatus::Clean => {
                debug!("working tree clean");
                return Ok(());
            }
            WorktreeStatus::Dirty(entries) => entries,
        };

        warn!(entries, "working tree has local modifications, resetting to HEAD");
        self.state.mark_changed();
        self.backend
            .hard_reset(handle)
            .map_err(|e| SyncError::Reconcile {
                stage: SyncStage::Reconciling,
                source: e.into(),
            })?;
        outcome.discarded_entries = entries;

        // A remote-driven snapshot from this cycle stays authoritative.
        if outcome.recorded == Some(SyncReason::Remote) {
            debug!("keeping remote snapshot recorded this cycle");
            return Ok(());
        }

        let snapshot = self
            .state
            .store_snapshot(&self.backend, handle, SyncReason::Local, Vec::new())
            .map_err(|e| SyncError::Reconcile {
                stage: SyncStage::Reconciling,
                source: e.into(),
            })?;
        outcome.recorded = Some(SyncReason::Local);
        info!(hash = snapshot.short_hash(), reason = %snapshot.reason, "restored working tree");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{BackendOp, MemoryBackend, MemoryRepo};
    use crate::error::StateError;
    use std::path::Path;

    fn options() -> RepositoryOptions {
        RepositoryOptions::new("mem://remote.git", "master", "/srv/mirror", "bot", "token")
    }

    fn seeded_engine() -> (SyncEngine<MemoryBackend>, MemoryBackend) {
        let backend = MemoryBackend::new(MemoryRepo::with_commit("c1", "initial"));
        backend.seed_local(&options());
        let engine = SyncEngine::start(backend.clone(), options(), Arc::new(SyncMetrics::new()))
            .unwrap();
        backend.clear_calls();
        (engine, backend)
    }

    #[test]
    fn test_first_cycle_clones_missing_repository() {
        let backend = MemoryBackend::new(MemoryRepo::with_commit("c1", "initial"));
        let mut engine = SyncEngine::new(backend.clone(), options(), Arc::new(SyncMetrics::new()));

        let report = engine.sync();
        let outcome = report.result.unwrap();
        assert!(outcome.cloned);
        assert_eq!(outcome.recorded, Some(SyncReason::Init));
        assert!(report.changed);

        let state = engine.state();
        assert!(state.has_changes());
        let snapshot = state.snapshot().unwrap();
        assert_eq!(snapshot.reason, SyncReason::Init);
        assert_eq!(snapshot.hash, "c1");
        assert_eq!(backend.call_count(BackendOp::Clone), 1);
        assert_eq!(backend.call_count(BackendOp::Pull), 0);
    }

    #[test]
    fn test_first_cycle_opens_existing_repository() {
        let backend = MemoryBackend::new(MemoryRepo::with_commit("c1", "initial"));
        backend.seed_local(&options());
        let engine =
            SyncEngine::start(backend.clone(), options(), Arc::new(SyncMetrics::new())).unwrap();

        let state = engine.state();
        assert!(!state.has_changes());
        assert_eq!(state.snapshot().unwrap().reason, SyncReason::Init);
        assert_eq!(backend.call_count(BackendOp::Clone), 0);
        assert_eq!(backend.call_count(BackendOp::Open), 1);
    }

    #[test]
    fn test_start_fails_when_clone_fails() {
        let backend = MemoryBackend::new(MemoryRepo::with_commit("c1", "initial"));
        backend.fail_next(BackendOp::Clone, "authentication required");
        let metrics = Arc::new(SyncMetrics::new());

        let err = SyncEngine::start(backend, options(), Arc::clone(&metrics))
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Acquisition { .. }));
        assert!(err.to_string().contains("authentication required"));
        assert_eq!(metrics.snapshot().sync_errors_total, 1);
    }

    #[test]
    fn test_start_survives_fetch_failure() {
        let backend = MemoryBackend::new(MemoryRepo::with_commit("c1", "initial"));
        backend.seed_local(&options());
        backend.fail_next(BackendOp::Fetch, "timeout");

        let engine = SyncEngine::start(backend, options(), Arc::new(SyncMetrics::new())).unwrap();
        assert_eq!(engine.metrics().snapshot().sync_errors_total, 1);
        assert_eq!(engine.state().snapshot().unwrap().reason, SyncReason::Init);
    }

    #[test]
    fn test_identical_trees_do_not_pull() {
        let (mut engine, backend) = seeded_engine();
        let before = engine.state().snapshot().unwrap();

        let report = engine.sync();
        assert!(report.is_ok());
        assert!(!report.changed);
        assert_eq!(backend.call_count(BackendOp::Pull), 0);
        assert_eq!(backend.call_count(BackendOp::HardReset), 0);
        assert_eq!(engine.state().snapshot().unwrap(), before);
    }

    #[test]
    fn test_remote_commit_with_same_tree_is_not_pulled() {
        let (mut engine, backend) = seeded_engine();
        backend.push_commit("c2", "empty commit", &[]);

        let report = engine.sync();
        let outcome = report.result.unwrap();
        assert!(outcome.fetched);
        assert_eq!(outcome.remote_changes, 0);
        assert!(!engine.state().has_changes());
        assert_eq!(backend.call_count(BackendOp::Pull), 0);
        assert_eq!(engine.state().snapshot().unwrap().reason, SyncReason::Init);
    }

    #[test]
    fn test_remote_changes_are_pulled_and_recorded() {
        let (mut engine, backend) = seeded_engine();
        backend.push_commit("c2", "add lib", &[("src/lib.rs", "lib-v1")]);
        backend.push_commit("c3", "update readme", &[("README.md", "readme-v2")]);

        let report = engine.sync();
        let outcome = report.result.unwrap();
        assert_eq!(outcome.remote_changes, 2);
        assert_eq!(outcome.recorded, Some(SyncReason::Remote));

        let snapshot = engine.state().snapshot().unwrap();
        assert_eq!(snapshot.hash, "c3");
        assert_eq!(snapshot.message, "update readme");
        assert_eq!(snapshot.reason, SyncReason::Remote);
        assert_eq!(snapshot.changes.len(), 2);
        assert!(engine.state().has_changes());
        assert_eq!(backend.local_head(Path::new("/srv/mirror")).as_deref(), Some("c3"));
    }

    #[test]
    fn test_dirty_worktree_is_reset() {
        let (mut engine, backend) = seeded_engine();
        backend.dirty_local(Path::new("/srv/mirror"), 3);

        let report = engine.sync();
        let outcome = report.result.unwrap();
        assert_eq!(outcome.discarded_entries, 3);
        assert_eq!(outcome.recorded, Some(SyncReason::Local));
        assert!(engine.state().has_changes());
        assert_eq!(engine.state().snapshot().unwrap().reason, SyncReason::Local);
        assert_eq!(backend.local_dirty(Path::new("/srv/mirror")), 0);
        assert_eq!(backend.call_count(BackendOp::Pull), 0);
    }

    #[test]
    fn test_remote_wins_when_both_fire() {
        let (mut engine, backend) = seeded_engine();
        backend.push_commit("c2", "one", &[("a.txt", "a1")]);
        backend.push_commit("c3", "two", &[("b.txt", "b1")]);
        backend.dirty_local(Path::new("/srv/mirror"), 1);

        let report = engine.sync();
        assert!(report.is_ok());
        assert!(engine.state().has_changes());

        let snapshot = engine.state().snapshot().unwrap();
        assert_eq!(snapshot.reason, SyncReason::Remote);
        assert_eq!(snapshot.hash, "c3");
        assert_eq!(backend.call_count(BackendOp::HardReset), 1);
        assert_eq!(backend.local_dirty(Path::new("/srv/mirror")), 0);
    }

    #[test]
    fn test_remote_stage_runs_before_local_stage() {
        let (mut engine, backend) = seeded_engine();
        backend.push_commit("c2", "one", &[("a.txt", "a1")]);
        backend.dirty_local(Path::new("/srv/mirror"), 1);

        engine.sync();
        let calls = backend.calls();
        let pull = calls.iter().position(|c| *c == BackendOp::Pull).unwrap();
        let status = calls
            .iter()
            .position(|c| *c == BackendOp::WorktreeStatus)
            .unwrap();
        let reset = calls.iter().position(|c| *c == BackendOp::HardReset).unwrap();
        assert!(pull < status);
        assert!(status < reset);
    }

    #[test]
    fn test_has_changes_cleared_at_cycle_start() {
        let (mut engine, backend) = seeded_engine();
        backend.dirty_local(Path::new("/srv/mirror"), 1);
        assert!(engine.sync().changed);

        // Fails before any detection step runs
        backend.fail_next(BackendOp::Open, "permission denied");
        let report = engine.sync();
        assert!(matches!(report.result, Err(SyncError::Acquisition { .. })));
        assert!(!report.changed);
        assert!(!engine.state().has_changes());
    }

    #[test]
    fn test_changes_flag_survives_later_stage_failure() {
        let (mut engine, backend) = seeded_engine();
        backend.push_commit("c2", "one", &[("a.txt", "a1")]);
        backend.dirty_local(Path::new("/srv/mirror"), 2);
        backend.fail_next(BackendOp::HardReset, "index locked");

        let report = engine.sync();
        assert!(matches!(
            report.result,
            Err(SyncError::Reconcile { stage: SyncStage::Reconciling, .. })
        ));
        assert!(engine.state().has_changes());
        assert_eq!(engine.state().snapshot().unwrap().reason, SyncReason::Remote);
    }

    #[test]
    fn test_status_failure_is_reconcile_error() {
        let (mut engine, backend) = seeded_engine();
        backend.push_commit("c2", "one", &[("a.txt", "a1")]);
        backend.dirty_local(Path::new("/srv/mirror"), 1);
        backend.fail_next(BackendOp::WorktreeStatus, "index unreadable");

        let report = engine.sync();
        let err = report.result.unwrap_err();
        assert!(matches!(err, SyncError::Reconcile { .. }));
        assert_eq!(err.stage(), SyncStage::ComparingLocal);
        assert_eq!(backend.call_count(BackendOp::HardReset), 0);
        assert_eq!(backend.local_dirty(Path::new("/srv/mirror")), 1);

        // Remote stage already completed in this cycle
        assert!(engine.state().has_changes());
        let snapshot = engine.state().snapshot().unwrap();
        assert_eq!(snapshot.reason, SyncReason::Remote);
        assert_eq!(snapshot.hash, "c2");
    }

    #[test]
    fn test_fetch_failure_aborts_cycle() {
        let (mut engine, backend) = seeded_engine();
        backend.push_commit("c2", "one", &[("a.txt", "a1")]);
        backend.fail_next(BackendOp::Fetch, "network unreachable");

        let report = engine.sync();
        let err = report.result.unwrap_err();
        assert_eq!(err.code(), "fetch_error");
        assert_eq!(backend.call_count(BackendOp::DiffTrees), 0);
        assert_eq!(engine.metrics().snapshot().sync_errors_total, 1);

        // Next cycle recovers on its own
        let report = engine.sync();
        assert_eq!(report.result.unwrap().remote_changes, 1);
    }

    #[test]
    fn test_diff_failure_is_compare_error() {
        let (mut engine, backend) = seeded_engine();
        backend.fail_next(BackendOp::DiffTrees, "corrupt tree");

        let err = engine.sync().result.unwrap_err();
        assert!(matches!(err, SyncError::Compare(_)));
        assert_eq!(backend.call_count(BackendOp::WorktreeStatus), 0);
    }

    #[test]
    fn test_pull_failure_is_integrate_error() {
        let (mut engine, backend) = seeded_engine();
        backend.push_commit("c2", "one", &[("a.txt", "a1")]);
        backend.fail_next(BackendOp::Pull, "non-fast-forward");

        let report = engine.sync();
        assert!(matches!(report.result, Err(SyncError::Integrate(_))));
        assert!(report.changed);
        assert_eq!(engine.state().snapshot().unwrap().reason, SyncReason::Init);
    }

    #[test]
    fn test_deleted_clone_is_recreated() {
        let (mut engine, backend) = seeded_engine();
        backend.remove_local(Path::new("/srv/mirror"));

        let report = engine.sync();
        let outcome = report.result.unwrap();
        assert!(outcome.cloned);
        assert!(report.changed);
        assert_eq!(engine.state().snapshot().unwrap().reason, SyncReason::Init);
    }

    #[test]
    fn test_empty_remote_has_no_snapshot() {
        let backend = MemoryBackend::new(MemoryRepo::empty());
        let engine = SyncEngine::start(backend, options(), Arc::new(SyncMetrics::new())).unwrap();

        assert!(matches!(engine.state().snapshot(), Err(StateError::NotAvailable)));
        assert_eq!(engine.metrics().snapshot().sync_errors_total, 1);
    }

    #[test]
    fn test_metrics_count_cycles_with_changes() {
        let (mut engine, backend) = seeded_engine();
        engine.sync();
        backend.dirty_local(Path::new("/srv/mirror"), 1);
        engine.sync();

        let snap = engine.metrics().snapshot();
        assert_eq!(snap.syncs_total, 3);
        assert_eq!(snap.syncs_with_changes, 1);
        assert_eq!(snap.sync_errors_total, 0);
        assert_eq!(engine.cycles(), 3);
    }
}
