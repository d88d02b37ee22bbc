//! Core domain types shared by the vault, host, and orchestration crates.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one orchestrator invocation (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// PartCode
// ---------------------------------------------------------------------------

/// A caller-supplied part identifier (an ERP material number in practice).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartCode(String);

impl PartCode {
    /// Wrap an already-trimmed identifier.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PartCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartCode {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// ResolvedFile
// ---------------------------------------------------------------------------

/// Whether a CAD file is a single part or a sub-assembly with references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Part,
    SubAssembly,
}

impl FileKind {
    /// Derive the kind from a file extension (case-insensitive).
    ///
    /// Returns `None` for anything that is not a part or assembly document.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "sldprt" => Some(Self::Part),
            "sldasm" => Some(Self::SubAssembly),
            _ => None,
        }
    }
}

/// A part code resolved to a concrete vault file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFile {
    /// The identifier this file was resolved from.
    pub source_code: PartCode,
    /// Path as reported by the vault search.
    pub vault_path: PathBuf,
    /// Path in the operator's local vault view.
    pub local_path: PathBuf,
    pub kind: FileKind,
}

// ---------------------------------------------------------------------------
// Run status, log events, statistics
// ---------------------------------------------------------------------------

/// Externally visible status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Connecting,
    Searching,
    Inserting,
    Paused,
    Completed,
    Error,
    Cancelled,
    /// The worker exited without reaching any other terminal status.
    Stopped,
}

impl RunStatus {
    /// Whether the run has ended in this status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Error | Self::Cancelled | Self::Stopped
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Searching => "searching",
            Self::Inserting => "inserting",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Severity tag attached to user-visible log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Notice,
    Success,
    Warning,
    Error,
}

/// One user-visible log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub message: String,
    pub severity: Severity,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    /// Create a log line stamped with the current time.
    pub fn now(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
            timestamp: Utc::now(),
        }
    }
}

/// Running counters for the current pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total: usize,
    pub success: usize,
    pub error: usize,
}

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

/// Caller-selected options for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Insert into an assembly that is already open instead of creating one.
    pub append_to_existing: bool,
    /// Resolve everything first and abort if any identifier is missing.
    pub abort_on_any_not_found: bool,
}
