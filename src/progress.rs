//! CLI progress reporting for `guard scan`.
//!
//! Two kinds of progress are reported: corpus indexing before a run
//! (items indexed out of total) and the run itself, mirrored from the
//! session's [`RunStatus`] watch channel. Progress goes to **stderr** so
//! stdout stays parseable for scripts.

use std::io::Write;
use std::sync::Arc;

use image_guard_core::models::{RunPhase, RunStatus};
use tokio::sync::watch;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// `n` of `total` corpus items have finished indexing.
    Indexing { n: u64, total: u64 },
    /// The run status changed.
    Run(RunStatus),
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait RunProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "scan  running   65%  Analysing batch 3/3".
pub struct StderrProgress;

impl RunProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Indexing { n, total } => format!(
                "index  {} / {} items\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Run(status) => format!(
                "scan  {:<8} {:>3}%  {}\n",
                phase_label(status.phase),
                status.progress,
                status.step.as_deref().unwrap_or("")
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RunProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Indexing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "n": n,
                "total": total
            }),
            ProgressEvent::Run(status) => serde_json::json!({
                "event": "progress",
                "phase": phase_label(status.phase),
                "progress": status.progress,
                "step": status.step
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RunProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn phase_label(phase: RunPhase) -> &'static str {
    match phase {
        RunPhase::Idle => "idle",
        RunPhase::Running => "running",
        RunPhase::Complete => "complete",
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Forward every run status change to `reporter` until the sender is
/// dropped or the run completes.
pub fn forward_run_status(
    mut rx: watch::Receiver<RunStatus>,
    reporter: Arc<dyn RunProgressReporter>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let status = rx.borrow_and_update().clone();
            let done = status.phase == RunPhase::Complete;
            reporter.report(ProgressEvent::Run(status));
            if done {
                break;
            }
        }
    })
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn RunProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}
