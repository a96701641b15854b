//! Prometheus text exposition of the sync counters and repository state

use std::fmt::Write;

use libgitsync_core::{MetricsSnapshot, RepositoryState};

/// Render every metric in the text exposition format
pub fn render(state: &RepositoryState, metrics: &MetricsSnapshot) -> String {
    let mut out = String::new();

    counter(
        &mut out,
        "git_sync_sync_count",
        "Total number of synchronizations with changes",
        metrics.syncs_with_changes,
    );
    counter(
        &mut out,
        "git_sync_sync_total_count",
        "Total number of synchronizations",
        metrics.syncs_total,
    );
    counter(
        &mut out,
        "git_sync_sync_total_error_count",
        "Total number of synchronization errors",
        metrics.sync_errors_total,
    );

    header(
        &mut out,
        "git_sync_last_sync_duration_ms",
        "Duration of the last synchronization in milliseconds",
        "gauge",
    );
    let _ = writeln!(out, "git_sync_last_sync_duration_ms {}", metrics.last_duration_ms);

    let options = state.options_ref();
    header(
        &mut out,
        "git_sync_repo_info",
        "Information about the synchronized repository",
        "gauge",
    );
    let _ = writeln!(
        out,
        "git_sync_repo_info{{repository=\"{}\",branch=\"{}\"}} 1",
        escape(options.url()),
        escape(options.branch())
    );

    if let Ok(snapshot) = state.snapshot() {
        header(
            &mut out,
            "git_sync_commit_info",
            "Information about the latest commit.",
            "gauge",
        );
        let _ = writeln!(
            out,
            "git_sync_commit_info{{hash=\"{}\",author=\"{}\",email=\"{}\",date=\"{}\",message=\"{}\",reason=\"{}\"}} 1",
            escape(&snapshot.hash),
            escape(&snapshot.author_name),
            escape(&snapshot.author_email),
            snapshot.timestamp.timestamp_millis(),
            escape(&snapshot.message),
            snapshot.reason,
        );
    }

    out
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    header(out, name, help, "counter");
    let _ = writeln!(out, "{} {}", name, value);
}

/// Escape a label value: backslash, double quote and newline
fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
