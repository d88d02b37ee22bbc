//! Read model folded from [`RunEvent`]s.

use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;

use assemblybuilder_shared::{LogEvent, PartCode, RunStats, RunStatus};

use crate::events::{RunEvent, RunSummary};

/// Log lines kept in the read model.
pub const MAX_LOG_LINES: usize = 1000;

/// Point-in-time view of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub status: RunStatus,
    pub progress: f64,
    pub stats: RunStats,
    pub not_found: Vec<PartCode>,
    /// Most recent log lines, oldest first.
    pub logs: VecDeque<LogEvent>,
}

impl Default for RunSnapshot {
    fn default() -> Self {
        Self {
            status: RunStatus::Idle,
            progress: 0.0,
            stats: RunStats::default(),
            not_found: Vec::new(),
            logs: VecDeque::new(),
        }
    }
}

/// Folds events into a [`RunSnapshot`].
#[derive(Debug, Default)]
pub struct RunMonitor {
    snapshot: RunSnapshot,
    /// Absolute index of `snapshot.logs[0]`.
    first_log_index: usize,
    summary: Option<RunSummary>,
}

impl RunMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: RunEvent) {
        match event {
            RunEvent::Status(status) => self.snapshot.status = status,
            RunEvent::Progress(progress) => self.snapshot.progress = progress,
            RunEvent::Stats(stats) => self.snapshot.stats = stats,
            RunEvent::Log(line) => {
                self.snapshot.logs.push_back(line);
                while self.snapshot.logs.len() > MAX_LOG_LINES {
                    self.snapshot.logs.pop_front();
                    self.first_log_index += 1;
                }
            }
            RunEvent::NotFound(code) => {
                if !self.snapshot.not_found.contains(&code) {
                    self.snapshot.not_found.push(code);
                }
            }
            RunEvent::Finished(summary) => {
                self.snapshot.status = summary.status;
                self.snapshot.stats = summary.stats;
                self.summary = Some(summary);
            }
        }
    }

    /// Apply every event currently queued; returns how many were applied.
    pub fn drain(&mut self, rx: &mut UnboundedReceiver<RunEvent>) -> usize {
        let mut applied = 0;
        while let Ok(event) = rx.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    pub fn snapshot(&self) -> &RunSnapshot {
        &self.snapshot
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }

    /// Log lines with absolute index `>= index`, plus the index to ask for next.
    ///
    /// Lines that already fell out of the window are skipped.
    pub fn logs_since(&self, index: usize) -> (Vec<LogEvent>, usize) {
        let start = index.saturating_sub(self.first_log_index);
        let lines: Vec<LogEvent> = self.snapshot.logs.iter().skip(start).cloned().collect();
        (lines, self.first_log_index + self.snapshot.logs.len())
    }
}
