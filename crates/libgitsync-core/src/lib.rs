pub mod types;
pub mod error;
pub mod state;
pub mod backend;
pub mod metrics;
pub mod engine;
pub mod scheduler;

pub use error::{BackendError, SchedulerError, StageFault, StateError, SyncError, SyncStage};
pub use types::{
    ChangeKind, ChangeRecord, CommitSnapshot, Credentials, FetchOutcome, PullOutcome,
    RepositoryOptions, ResolvedCommit, SyncReason, WorktreeStatus, DEFAULT_REMOTE_NAME,
};
pub use state::{RepositoryState, HEAD_REF};
pub use backend::VcsBackend;
pub use metrics::{MetricsSnapshot, SyncMetrics};
pub use engine::{CycleOutcome, CycleReport, SyncEngine};
pub use scheduler::{trigger_channel, Scheduler, MAX_PERIOD, TriggerHandle, TriggerReceiver, TriggerSource, TriggerStatus};
