//! Drives the sync engine from a periodic timer and an external trigger
//! channel, one cycle at a time.
//!
//! The engine is owned by the scheduler loop and moved into a blocking task
//! for the duration of a cycle, so two cycles can never overlap. Triggers that
//! arrive while a cycle runs collapse into at most one pending request.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backend::VcsBackend;
use crate::engine::{CycleReport, SyncEngine};
use crate::error::SchedulerError;

/// Pending external requests beyond the running cycle
const TRIGGER_CAPACITY: usize = 1;

/// Longest accepted interval between periodic cycles
pub const MAX_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// What happened to an external trigger request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerStatus {
    /// A cycle will run for this request
    Queued,
    /// A request is already pending; this one was merged into it
    Coalesced,
    /// The scheduler has stopped
    Closed,
}

impl TriggerStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, TriggerStatus::Closed)
    }
}

/// Where a cycle request came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSource {
    Interval,
    External { client: String },
}

/// Sending side of the trigger channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<String>,
}

impl TriggerHandle {
    /// Ask for a cycle on behalf of `client`. Never blocks.
    pub fn request(&self, client: impl Into<String>) -> TriggerStatus {
        match self.tx.try_send(client.into()) {
            Ok(()) => TriggerStatus::Queued,
            Err(mpsc::error::TrySendError::Full(client)) => {
                debug!(client = %client, "sync already pending, request coalesced");
                TriggerStatus::Coalesced
            }
            Err(mpsc::error::TrySendError::Closed(_)) => TriggerStatus::Closed,
        }
    }
}

/// Receiving side of the trigger channel, owned by the [`Scheduler`]
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<String>,
}

/// Create a trigger channel
pub fn trigger_channel() -> (TriggerHandle, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(TRIGGER_CAPACITY);
    (TriggerHandle { tx }, TriggerReceiver { rx })
}

/// Single-cycle-at-a-time loop around a [`SyncEngine`]
pub struct Scheduler<B: VcsBackend> {
    engine: SyncEngine<B>,
    period: Duration,
    triggers: TriggerReceiver,
    shutdown: broadcast::Receiver<()>,
}

impl<B: VcsBackend> Scheduler<B> {
    /// `period` must be non-zero
    pub fn new(
        engine: SyncEngine<B>,
        period: Duration,
        triggers: TriggerReceiver,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let period = if period > MAX_PERIOD {
            warn!(period_secs = period.as_secs(), "sync period too long, capped at one week");
            MAX_PERIOD
        } else {
            period
        };
        Self {
            engine,
            period,
            triggers,
            shutdown,
        }
    }

    /// Run until shutdown is signalled, then hand the engine back.
    ///
    /// A cycle that is already running completes before the loop observes
    /// the shutdown signal.
    pub async fn run(self) -> Result<SyncEngine<B>, SchedulerError> {
        let Self {
            engine,
            period,
            mut triggers,
            mut shutdown,
        } = self;

        info!(period_ms = period.as_millis() as u64, "scheduler started");

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut engine = Some(engine);
        let mut triggers_open = true;

        loop {
            let source = tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("shutdown requested, stopping scheduler");
                    break;
                }
                _ = ticker.tick() => TriggerSource::Interval,
                received = triggers.rx.recv(), if triggers_open => match received {
                    Some(client) => TriggerSource::External { client },
                    None => {
                        debug!("trigger channel closed");
                        triggers_open = false;
                        continue;
                    }
                },
            };

            match &source {
                TriggerSource::Interval => debug!("sync triggered by interval"),
                TriggerSource::External { client } => {
                    info!(client = %client, "sync triggered externally")
                }
            }

            let Some(current) = engine.take() else {
                break;
            };
            let (returned, report) = run_cycle(current).await?;
            engine = Some(returned);

            if let Err(e) = &report.result {
                debug!(cycle = report.cycle, code = e.code(), "cycle failed, waiting for next trigger");
            }
        }

        info!("scheduler stopped");
        engine.ok_or(SchedulerError::CycleLost {
            cycle: 0,
            message: "engine unavailable after shutdown".to_string(),
        })
    }
}

async fn run_cycle<B: VcsBackend>(
    mut engine: SyncEngine<B>,
) -> Result<(SyncEngine<B>, CycleReport), SchedulerError> {
    let cycle = engine.cycles() + 1;
    tokio::task::spawn_blocking(move || {
        let report = engine.sync();
        (engine, report)
    })
    .await
    .map_err(|e| {
        error!(cycle, "sync task failed: {}", e);
        SchedulerError::CycleLost {
            cycle,
            message: e.to_string(),
        }
    })
}
