//! Events emitted by the worker thread for any number of readers.

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use assemblybuilder_host::FinalizeReport;
use assemblybuilder_shared::{LogEvent, PartCode, RunStats, RunStatus, Severity};

/// Everything a run reports while it executes.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Status(RunStatus),
    /// Overall progress in `0.0..=1.0`.
    Progress(f64),
    Stats(RunStats),
    Log(LogEvent),
    /// A code that yielded no usable file, reported once per run.
    NotFound(PartCode),
    Finished(RunSummary),
}

/// Final result of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub status: RunStatus,
    pub stats: RunStats,
    /// Codes with no usable vault file, in first-seen order.
    pub not_found: Vec<PartCode>,
    /// Full restarts performed after host session loss.
    pub restarts: u32,
    /// Report of the last finalizer pass, if one ran.
    pub finalize: Option<FinalizeReport>,
    /// Build passes that reached completion (one per kit in kit mode).
    pub passes_completed: usize,
}

impl RunSummary {
    pub(crate) fn new(status: RunStatus) -> Self {
        Self {
            status,
            stats: RunStats::default(),
            not_found: Vec::new(),
            restarts: 0,
            finalize: None,
            passes_completed: 0,
        }
    }
}

/// Worker-side sender. A dropped receiver silently discards events.
#[derive(Debug, Clone, Default)]
pub struct RunReporter {
    tx: Option<UnboundedSender<RunEvent>>,
}

impl RunReporter {
    pub fn new(tx: UnboundedSender<RunEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A reporter that only mirrors log lines to `tracing`.
    pub fn silent() -> Self {
        Self::default()
    }

    fn send(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn status(&self, status: RunStatus) {
        debug!(%status, "run status");
        self.send(RunEvent::Status(status));
    }

    pub fn progress(&self, fraction: f64) {
        self.send(RunEvent::Progress(fraction.clamp(0.0, 1.0)));
    }

    pub fn stats(&self, stats: RunStats) {
        self.send(RunEvent::Stats(stats));
    }

    pub fn not_found(&self, code: &PartCode) {
        self.send(RunEvent::NotFound(code.clone()));
    }

    pub fn finished(&self, summary: &RunSummary) {
        self.send(RunEvent::Finished(summary.clone()));
    }

    /// Emit a user-visible log line, mirrored to `tracing`.
    pub fn log(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Warning | Severity::Error => warn!(target: "assemblybuilder::run", "{message}"),
            _ => info!(target: "assemblybuilder::run", "{message}"),
        }
        self.send(RunEvent::Log(LogEvent::now(severity, message)));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Severity::Info, message);
    }

    pub fn notice(&self, message: impl Into<String>) {
        self.log(Severity::Notice, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(Severity::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(Severity::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Severity::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;

    #[test]
    fn reporter_forwards_events_in_order() {
        let (tx, mut rx) = unbounded_channel();
        let reporter = RunReporter::new(tx);
        reporter.status(RunStatus::Connecting);
        reporter.progress(1.7);
        reporter.warning("vault offline");

        assert!(matches!(rx.try_recv(), Ok(RunEvent::Status(RunStatus::Connecting))));
        assert!(matches!(rx.try_recv(), Ok(RunEvent::Progress(p)) if p == 1.0));
        match rx.try_recv() {
            Ok(RunEvent::Log(line)) => {
                assert_eq!(line.severity, Severity::Warning);
                assert_eq!(line.message, "vault offline");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn dropped_receiver_is_harmless() {
        let (tx, rx) = unbounded_channel();
        drop(rx);
        RunReporter::new(tx).info("nobody listens");
        RunReporter::silent().info("nobody listens either");
    }
}
