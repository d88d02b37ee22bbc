//! Run orchestration for AssemblyBuilder.
//!
//! This crate ties the vault and host layers together into end-to-end runs:
//! code cleaning, the resolve → freshen → insert loop with session restarts,
//! kit expansion, pause/cancel control, and the event stream a UI observes.

pub mod cleaning;
pub mod control;
pub mod dialogs;
pub mod events;
pub mod keepalive;
pub mod kit;
pub mod monitor;
pub mod orchestrator;

pub use cleaning::{CleanedCodes, DropReason, DroppedToken, clean_codes, split_codes};
pub use control::RunControl;
pub use dialogs::{ButtonInfo, DialogDriver, DialogRules, DialogWatcher, WindowId, WindowInfo, sweep};
pub use events::{RunEvent, RunReporter, RunSummary};
pub use keepalive::{KeepAlive, KeepAliveStats, SessionPinger};
pub use kit::{Bom, BomHeader, BomLine, BomSource, StaticBomSource, format_bom_table};
pub use monitor::{MAX_LOG_LINES, RunMonitor, RunSnapshot};
pub use orchestrator::{
    PassStrategy, RunHandle, RunOrchestrator, RunRequest, RunServices, start,
};
