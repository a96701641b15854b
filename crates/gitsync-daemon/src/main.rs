//! gitsyncd - keeps a local git clone in sync with a remote branch
//!
//! The daemon:
//! - Clones or opens the local repository and runs a first sync
//! - Re-syncs on a fixed interval and on webhook requests
//! - Discards local edits and force-pulls remote changes
//! - Exposes metrics and status over HTTP when configured

mod config;
mod error;
mod http;
mod prometheus;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use libgitsync_core::{trigger_channel, Scheduler, SyncEngine, SyncMetrics};
use libgitsync_git::Git2Backend;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{Cli, Settings};
use error::DaemonError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let instance_id = uuid::Uuid::new_v4();
    info!(instance = %instance_id, version = env!("CARGO_PKG_VERSION"), "gitsyncd starting");

    // Write PID file if specified
    if let Some(ref pid_file) = cli.pid_file {
        if let Err(e) = std::fs::write(pid_file, std::process::id().to_string()) {
            error!("Failed to write PID file: {}", e);
        }
    }

    let code = match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    };

    // Cleanup PID file
    if let Some(ref pid_file) = cli.pid_file {
        remove_pid_file(pid_file);
    }

    info!("gitsyncd stopped");
    code
}

async fn run(cli: &Cli) -> Result<(), DaemonError> {
    let settings = Settings::load(cli)?;
    let options = settings.repository.clone();
    info!(
        url = options.url(),
        branch = options.branch(),
        remote = options.remote_name(),
        path = %options.path().display(),
        interval_ms = settings.interval.as_millis() as u64,
        "configuration loaded"
    );

    // First cycle; without a usable clone there is nothing to serve
    let metrics = Arc::new(SyncMetrics::new());
    let engine = {
        let metrics = Arc::clone(&metrics);
        tokio::task::spawn_blocking(move || SyncEngine::start(Git2Backend::new(), options, metrics))
            .await??
    };
    let state = engine.state();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (triggers, trigger_rx) = trigger_channel();

    let server = match &settings.http {
        Some(http_settings) => {
            let listener = http::bind(http_settings.addr).await?;
            let app_state = http::AppState::new(
                Arc::clone(&state),
                Arc::clone(&metrics),
                triggers.clone(),
                http_settings.auth.clone(),
            );
            Some(tokio::spawn(http::serve(
                listener,
                app_state,
                shutdown_tx.subscribe(),
            )))
        }
        None => {
            info!("HTTP server disabled");
            None
        }
    };
    drop(triggers);

    let scheduler = Scheduler::new(
        engine,
        settings.interval,
        trigger_rx,
        shutdown_tx.subscribe(),
    );
    let mut scheduler = tokio::spawn(scheduler.run());

    let shutdown = setup_signal_handlers();
    let finished = tokio::select! {
        _ = shutdown => {
            info!("Received shutdown signal");
            None
        }
        // Only ends on its own when a cycle task was lost
        joined = &mut scheduler => Some(joined),
    };

    let _ = shutdown_tx.send(());
    let joined = match finished {
        Some(joined) => joined,
        None => {
            info!("Waiting for the running sync cycle to finish");
            scheduler.await
        }
    };
    let mut result = match joined {
        Ok(Ok(_engine)) => Ok(()),
        Ok(Err(e)) => Err(DaemonError::from(e)),
        Err(e) => Err(DaemonError::from(e)),
    };

    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if result.is_ok() => result = Err(e),
            Ok(Err(e)) => warn!("HTTP server error: {}", e),
            Err(e) => warn!("HTTP server task failed: {}", e),
        }
    }

    if let Ok(snapshot) = state.snapshot() {
        info!(hash = snapshot.short_hash(), reason = %snapshot.reason, "last recorded commit");
    }
    result
}

fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove PID file {}: {}", path.display(), e);
    }
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers() -> impl std::future::Future<Output = ()> {
    async {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
    }
}
