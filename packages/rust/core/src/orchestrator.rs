//! Run Orchestrator: drives part codes through resolve → freshen → insert.
//!
//! One loop serves both modes; [`PassStrategy`] decides whether every code is
//! resolved before the first insertion (batch) or each code is resolved and
//! inserted in turn (immediate). Host session loss restarts the pass from the
//! first code in a brand-new session.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::{debug, error, info_span, instrument, warn};

use assemblybuilder_host::{
    AssemblySession, AssemblyTarget, ComponentInserter, FinalizeReport, Finalizer, HostApp,
    HostConnector, HostSessionManager, InsertionOutcome,
};
use assemblybuilder_shared::{
    AssemblyBuilderError, PartCode, ResolvedFile, Result, RunConfig, RunId, RunOptions, RunStats,
    RunStatus,
};
use assemblybuilder_vault::{Freshness, FreshnessReconciler, VaultConnector, VaultResolver, VaultSession};

use crate::cleaning::{DropReason, clean_codes};
use crate::control::RunControl;
use crate::dialogs::{DialogDriver, DialogRules, DialogWatcher};
use crate::events::{RunEvent, RunReporter, RunSummary};
use crate::keepalive::{KeepAlive, SessionPinger};
use crate::kit::{BomSource, format_bom_table};

// ---------------------------------------------------------------------------
// Collaborators and strategy
// ---------------------------------------------------------------------------

/// External collaborators for one run.
#[derive(Clone)]
pub struct RunServices {
    pub vault: Arc<dyn VaultConnector>,
    pub host: Arc<dyn HostConnector>,
    pub bom: Option<Arc<dyn BomSource>>,
    pub dialogs: Option<Arc<dyn DialogDriver>>,
    pub pinger: Option<Arc<dyn SessionPinger>>,
}

impl RunServices {
    pub fn new(vault: Arc<dyn VaultConnector>, host: Arc<dyn HostConnector>) -> Self {
        Self {
            vault,
            host,
            bom: None,
            dialogs: None,
            pinger: None,
        }
    }

    pub fn with_bom(mut self, bom: Arc<dyn BomSource>) -> Self {
        self.bom = Some(bom);
        self
    }

    pub fn with_dialogs(mut self, driver: Arc<dyn DialogDriver>) -> Self {
        self.dialogs = Some(driver);
        self
    }

    pub fn with_pinger(mut self, pinger: Arc<dyn SessionPinger>) -> Self {
        self.pinger = Some(pinger);
        self
    }
}

/// How a build pass orders resolution and insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassStrategy {
    /// Resolve and freshen every code before the first insertion.
    pub resolve_early: bool,
    /// Abort the pass before inserting if any code is unresolved.
    pub abort_on_not_found: bool,
}

impl PassStrategy {
    pub const BATCH: Self = Self {
        resolve_early: true,
        abort_on_not_found: true,
    };

    pub const IMMEDIATE: Self = Self {
        resolve_early: false,
        abort_on_not_found: false,
    };

    pub fn from_options(options: &RunOptions) -> Self {
        if options.abort_on_any_not_found {
            Self::BATCH
        } else {
            Self::IMMEDIATE
        }
    }
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// How a single build pass ended.
enum PassEnd {
    Completed(FinalizeReport),
    Cancelled,
    /// Batch mode found unresolved codes and never touched the host.
    Aborted,
    Failed(AssemblyBuilderError),
}

/// Maps a pass-local fraction into the run's overall progress range.
#[derive(Debug, Clone, Copy)]
struct ProgressScale {
    start: f64,
    span: f64,
}

impl ProgressScale {
    const FULL: Self = Self {
        start: 0.0,
        span: 1.0,
    };

    fn map(self, fraction: f64) -> f64 {
        self.start + self.span * fraction
    }
}

#[derive(Default)]
struct Tally {
    /// Counters of earlier completed passes (kit mode).
    base: RunStats,
    pass: RunStats,
    /// Codes not found in the current pass.
    pass_not_found: Vec<PartCode>,
    /// Codes not found anywhere in the run, first-seen order.
    not_found: Vec<PartCode>,
    cache: HashMap<PartCode, Option<ResolvedFile>>,
    /// Session restarts over the whole run.
    restarts: u32,
    /// Session restarts of the current pass; the limit applies to this one.
    pass_restarts: u32,
    finalize: Option<FinalizeReport>,
    passes_completed: usize,
}

impl Tally {
    fn begin_pass(&mut self, total: usize) {
        self.base.total += self.pass.total;
        self.base.success += self.pass.success;
        self.base.error += self.pass.error;
        self.pass = RunStats {
            total,
            ..RunStats::default()
        };
        self.pass_not_found.clear();
        self.pass_restarts = 0;
    }

    fn current(&self) -> RunStats {
        RunStats {
            total: self.base.total + self.pass.total,
            success: self.base.success + self.pass.success,
            error: self.base.error + self.pass.error,
        }
    }
}

fn fraction(index: usize, count: usize) -> f64 {
    if count == 0 {
        1.0
    } else {
        (index + 1) as f64 / count as f64
    }
}

/// Outcome of looking up one code.
enum Lookup {
    Ready(ResolvedFile),
    Missing,
    /// The run was cancelled while waiting for the vault.
    Cancelled,
}

/// Background services that live for the duration of one run.
struct ServiceGuards {
    _dialogs: Option<DialogWatcher>,
    _keepalive: Option<KeepAlive>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Top-level state machine. Runs synchronously on the calling thread, which
/// must be the only thread touching host handles.
pub struct RunOrchestrator {
    config: RunConfig,
    services: RunServices,
    control: RunControl,
    reporter: RunReporter,
}

impl RunOrchestrator {
    pub fn new(
        config: RunConfig,
        services: RunServices,
        control: RunControl,
        reporter: RunReporter,
    ) -> Self {
        Self {
            config,
            services,
            control,
            reporter,
        }
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// Build one assembly from `codes`.
    #[instrument(skip_all, fields(codes = codes.len()))]
    pub fn run<S: AsRef<str>>(&self, codes: &[S], options: RunOptions) -> RunSummary {
        self.guarded(|tally| self.run_codes(codes, options, tally))
    }

    /// Expand each kit through the BOM source and build one assembly per kit.
    #[instrument(skip_all, fields(kits = kit_codes.len()))]
    pub fn run_kits<S: AsRef<str>>(&self, kit_codes: &[S], options: RunOptions) -> RunSummary {
        self.guarded(|tally| self.run_kit_list(kit_codes, options, tally))
    }

    /// Catch anything unanticipated and still close the run out cleanly.
    ///
    /// The tally is owned out here, so a run that panics still reports the
    /// counts and not-found codes it had gathered.
    fn guarded(&self, body: impl FnOnce(&mut Tally) -> RunStatus) -> RunSummary {
        let mut tally = Tally::default();
        let status = match panic::catch_unwind(AssertUnwindSafe(|| body(&mut tally))) {
            Ok(status) => status,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                error!(%message, "run aborted by internal error");
                self.reporter
                    .error(format!("Unexpected internal error: {message}"));
                RunStatus::Error
            }
        };
        let summary = self.finish(status, tally);
        self.reporter.status(summary.status);
        self.reporter.finished(&summary);
        summary
    }

    fn run_codes<S: AsRef<str>>(&self, raw: &[S], options: RunOptions, tally: &mut Tally) -> RunStatus {
        let codes = self.clean(raw);
        if codes.is_empty() {
            self.reporter.error("No valid part codes to process");
            return RunStatus::Error;
        }

        tally.begin_pass(codes.len());
        self.reporter.stats(tally.current());
        self.reporter.progress(0.0);

        let _services = self.start_services();

        self.reporter.status(RunStatus::Connecting);
        let Some(mut vault) = self.connect_vault() else {
            return RunStatus::Cancelled;
        };
        self.reporter.progress(0.1);

        let target = if options.append_to_existing {
            AssemblyTarget::ExistingOpen
        } else {
            AssemblyTarget::New
        };
        let strategy = PassStrategy::from_options(&options);

        let end = self.build_pass(
            &mut vault,
            &codes,
            strategy,
            &target,
            tally,
            ProgressScale::FULL,
        );
        match end {
            PassEnd::Completed(report) => {
                tally.finalize = Some(report);
                tally.passes_completed += 1;
                RunStatus::Completed
            }
            PassEnd::Cancelled => RunStatus::Cancelled,
            PassEnd::Aborted => RunStatus::Cancelled,
            PassEnd::Failed(e) => {
                self.reporter.error(format!("Build stopped: {e}"));
                RunStatus::Error
            }
        }
    }

    fn run_kit_list<S: AsRef<str>>(&self, raw: &[S], options: RunOptions, tally: &mut Tally) -> RunStatus {
        let kits = self.clean(raw);
        if kits.is_empty() {
            self.reporter.error("No valid kit codes to process");
            return RunStatus::Error;
        }
        let Some(bom_source) = self.services.bom.clone() else {
            self.reporter.error("No bill-of-materials source configured");
            return RunStatus::Error;
        };

        let _services = self.start_services();

        self.reporter.status(RunStatus::Connecting);
        let Some(mut vault) = self.connect_vault() else {
            return RunStatus::Cancelled;
        };

        let strategy = PassStrategy::from_options(&options);
        let kit_count = kits.len();

        for (k, kit) in kits.iter().enumerate() {
            if !self.checkpoint(RunStatus::Searching) {
                return RunStatus::Cancelled;
            }
            self.reporter.status(RunStatus::Searching);
            self.reporter
                .notice(format!("[{}/{kit_count}] Processing kit {kit}", k + 1));

            let codes = match bom_source.bom(kit.as_str()) {
                Ok(bom) if !bom.lines.is_empty() => {
                    self.reporter
                        .success(format!("{} components found", bom.lines.len()));
                    for line in format_bom_table(&bom) {
                        self.reporter.info(line);
                    }
                    self.clean(&bom.component_codes())
                }
                Ok(_) => {
                    self.reporter
                        .warning(format!("Kit {kit} has no components, skipped"));
                    Vec::new()
                }
                Err(e) => {
                    self.reporter
                        .warning(format!("Could not read the bill of materials for {kit}: {e}"));
                    Vec::new()
                }
            };

            if !codes.is_empty() {
                tally.begin_pass(codes.len());
                self.reporter.stats(tally.current());
                self.reporter.notice(format!(
                    "Building kit {kit} ({} parts)",
                    codes.len()
                ));

                let scale = ProgressScale {
                    start: k as f64 / kit_count as f64,
                    span: 1.0 / kit_count as f64,
                };
                match self.build_pass(
                    &mut vault,
                    &codes,
                    strategy,
                    &AssemblyTarget::New,
                    tally,
                    scale,
                ) {
                    PassEnd::Completed(report) => {
                        tally.finalize = Some(report);
                        tally.passes_completed += 1;
                        self.reporter.success(format!(
                            "Kit {kit} assembled with {} components",
                            tally.pass.success
                        ));
                    }
                    PassEnd::Cancelled => return RunStatus::Cancelled,
                    PassEnd::Aborted => {
                        self.reporter.warning(format!("Kit {kit} skipped"));
                    }
                    PassEnd::Failed(e) => {
                        self.reporter.error(format!("Build stopped: {e}"));
                        return RunStatus::Error;
                    }
                }
            }

            self.reporter.progress(fraction(k, kit_count));
        }

        self.reporter.success("All kits processed");
        RunStatus::Completed
    }

    /// One complete build: optional search phase, insertion loop with
    /// restart-from-zero, then the finalizer.
    #[instrument(skip_all, fields(items = codes.len(), resolve_early = strategy.resolve_early))]
    fn build_pass(
        &self,
        vault: &mut Box<dyn VaultSession>,
        codes: &[PartCode],
        strategy: PassStrategy,
        target: &AssemblyTarget,
        tally: &mut Tally,
        scale: ProgressScale,
    ) -> PassEnd {
        let count = codes.len();

        if strategy.resolve_early {
            self.reporter.status(RunStatus::Searching);
            for (i, code) in codes.iter().enumerate() {
                if !self.checkpoint(RunStatus::Searching) {
                    return PassEnd::Cancelled;
                }
                if let Lookup::Cancelled = self.prepare(vault, code, tally) {
                    return PassEnd::Cancelled;
                }
                self.reporter.stats(tally.current());
                self.reporter.progress(scale.map(0.1 + 0.4 * fraction(i, count)));
            }

            if strategy.abort_on_not_found && !tally.pass_not_found.is_empty() {
                let missing: Vec<&str> = tally.pass_not_found.iter().map(PartCode::as_str).collect();
                self.reporter.error(format!(
                    "{} part(s) not found, nothing was inserted: {}",
                    missing.len(),
                    missing.join(", ")
                ));
                return PassEnd::Aborted;
            }
        }

        let (insert_start, insert_span) = if strategy.resolve_early {
            (0.5, 0.5)
        } else {
            (0.1, 0.9)
        };

        let manager = HostSessionManager::new(&self.config.host, &self.config.timings);
        let inserter = ComponentInserter::new(&self.config.host, &self.config.timings);

        let (mut app, mut session) = match self.open_session(target, None) {
            Ok(pair) => pair,
            Err(e) => return PassEnd::Failed(e),
        };
        self.reporter.status(RunStatus::Inserting);

        let mut i = 0;
        while i < count {
            if !self.checkpoint(RunStatus::Inserting) {
                return PassEnd::Cancelled;
            }
            let code = &codes[i];

            let file = match self.prepare(vault, code, tally) {
                Lookup::Ready(file) => file,
                Lookup::Missing => {
                    self.reporter.stats(tally.current());
                    self.reporter
                        .progress(scale.map(insert_start + insert_span * fraction(i, count)));
                    i += 1;
                    continue;
                }
                Lookup::Cancelled => return PassEnd::Cancelled,
            };

            let lost = if !manager.is_alive(app.as_ref()) {
                Some("host is not responding".to_string())
            } else if let Err(e) = manager.refresh(app.as_ref(), &mut session) {
                Some(e.to_string())
            } else {
                let name = file_label(&file);
                let report = inserter.insert(app.as_ref(), &mut session, &file.local_path, file.kind);
                for attempt in &report.errors {
                    debug!(%attempt, "insertion attempt failed");
                }
                match report.outcome {
                    InsertionOutcome::Inserted(component) => {
                        tally.pass.success += 1;
                        self.reporter.success(format!(
                            "Added {name} as {} (Z={:.3} m)",
                            component.name, report.offset_used
                        ));
                        None
                    }
                    InsertionOutcome::ConnectionLost => {
                        Some(format!("connection lost while adding {name}"))
                    }
                    InsertionOutcome::Failed(errors) if manager.is_alive(app.as_ref()) => {
                        tally.pass.error += 1;
                        let failure = AssemblyBuilderError::InsertionFailed {
                            path: file.local_path.clone(),
                            attempts: errors.len(),
                        };
                        self.reporter.warning(format!("Could not add {name}: {failure}"));
                        if strategy.resolve_early && self.config.abort_on_insert_failure {
                            self.reporter.stats(tally.current());
                            return PassEnd::Failed(failure);
                        }
                        None
                    }
                    InsertionOutcome::Failed(_) => {
                        Some(format!("host stopped responding while adding {name}"))
                    }
                }
            };

            if let Some(reason) = lost {
                match self.restart(target, &session, tally, &reason) {
                    Ok((new_app, new_session)) => {
                        app = new_app;
                        session = new_session;
                        i = 0;
                        continue;
                    }
                    Err(e) => return PassEnd::Failed(e),
                }
            }

            self.reporter.stats(tally.current());
            self.reporter
                .progress(scale.map(insert_start + insert_span * fraction(i, count)));
            i += 1;
        }

        if self.control.is_cancelled() {
            return PassEnd::Cancelled;
        }
        if let Err(e) = manager.refresh(app.as_ref(), &mut session) {
            warn!(error = %e, "could not re-activate assembly before finalizing");
        }
        PassEnd::Completed(Finalizer.run(session.document.as_ref()))
    }

    /// Acquire the host and a fresh assembly session.
    ///
    /// With `pinned`, that assembly is re-pinned by title when it is still
    /// open; otherwise `target` decides.
    fn open_session(
        &self,
        target: &AssemblyTarget,
        pinned: Option<&str>,
    ) -> Result<(Box<dyn HostApp>, AssemblySession)> {
        let manager = HostSessionManager::new(&self.config.host, &self.config.timings);
        let app = manager.acquire_app(self.services.host.as_ref())?;
        let session = match pinned {
            Some(title) => manager
                .acquire_assembly(app.as_ref(), &AssemblyTarget::Locked(title.to_string()))
                .or_else(|e| {
                    debug!(error = %e, "pinned assembly is gone");
                    manager.acquire_assembly(app.as_ref(), target)
                })?,
            None => manager.acquire_assembly(app.as_ref(), target)?,
        };

        if session.created {
            self.reporter
                .notice(format!("New assembly {} created and pinned", session.locked_title));
        } else {
            self.reporter.notice(format!(
                "Adding to {}: {} existing components, starting at Z={:.3} m",
                session.locked_title, session.initial_component_count, session.placement_offset
            ));
        }
        Ok((app, session))
    }

    /// Replace the whole host session and reset the pass counters.
    ///
    /// When extending an existing assembly, the replacement stays on the
    /// assembly the lost session had pinned.
    fn restart(
        &self,
        target: &AssemblyTarget,
        lost: &AssemblySession,
        tally: &mut Tally,
        reason: &str,
    ) -> Result<(Box<dyn HostApp>, AssemblySession)> {
        let limit = self.config.host.max_session_restarts;
        if tally.pass_restarts >= limit {
            return Err(AssemblyBuilderError::SessionLost {
                reason: format!("{reason}; gave up after {limit} restarts"),
            });
        }
        tally.pass_restarts += 1;
        tally.restarts += 1;

        warn!(reason, restart = tally.pass_restarts, "host session lost");
        self.reporter.warning(format!(
            "Host session lost ({reason}); restarting, all parts will be re-added"
        ));

        let pinned = match target {
            AssemblyTarget::ExistingOpen => Some(lost.locked_title.as_str()),
            _ => None,
        };
        let pair = self.open_session(target, pinned)?;
        tally.pass.success = 0;
        tally.pass.error = tally.pass_not_found.len();
        self.reporter.stats(tally.current());
        Ok(pair)
    }

    /// Resolve and freshen `code` once per run.
    ///
    /// A vault outage is never cached as a miss: the session is replaced and
    /// the same code is looked up again.
    fn prepare(
        &self,
        vault: &mut Box<dyn VaultSession>,
        code: &PartCode,
        tally: &mut Tally,
    ) -> Lookup {
        let file = match tally.cache.get(code) {
            Some(cached) => cached.clone(),
            None => loop {
                if !vault.is_alive() {
                    self.reporter.warning("Vault session dropped, reconnecting");
                    match self.connect_vault() {
                        Some(session) => *vault = session,
                        None => return Lookup::Cancelled,
                    }
                }
                match self.resolve_fresh(vault.as_ref(), code) {
                    Ok(file) => {
                        tally.cache.insert(code.clone(), Some(file.clone()));
                        break Some(file);
                    }
                    Err(e) if e.is_vault_outage() => {
                        warn!(%code, error = %e, "vault lookup interrupted");
                        self.reporter
                            .warning(format!("Vault lookup for {code} failed ({e}); reconnecting"));
                        let retry = self.config.vault.connect_retry;
                        if !self
                            .control
                            .sleep_unless_cancelled(retry, self.config.timings.pause_poll)
                        {
                            return Lookup::Cancelled;
                        }
                        match self.connect_vault() {
                            Some(session) => *vault = session,
                            None => return Lookup::Cancelled,
                        }
                    }
                    Err(AssemblyBuilderError::NotFound { .. }) => {
                        self.reporter.warning(format!("Not found in vault: {code}"));
                        tally.cache.insert(code.clone(), None);
                        break None;
                    }
                    Err(e) => {
                        self.reporter
                            .warning(format!("No usable local copy of {code}: {e}"));
                        tally.cache.insert(code.clone(), None);
                        break None;
                    }
                }
            },
        };

        let Some(file) = file else {
            if !tally.pass_not_found.contains(code) {
                tally.pass_not_found.push(code.clone());
                tally.pass.error += 1;
                if !tally.not_found.contains(code) {
                    tally.not_found.push(code.clone());
                    self.reporter.not_found(code);
                }
            }
            return Lookup::Missing;
        };
        Lookup::Ready(file)
    }

    /// Find `code` in the vault and bring its local copy up to date.
    ///
    /// Any failed vault call while searching comes back as `VaultUnavailable`;
    /// a code without a usable file comes back as `NotFound` or the freshness
    /// error that ruled it out.
    fn resolve_fresh(&self, vault: &dyn VaultSession, code: &PartCode) -> Result<ResolvedFile> {
        let resolution = VaultResolver::new(&self.config.vault)
            .resolve(vault, code)
            .map_err(|e| match e {
                e @ AssemblyBuilderError::VaultUnavailable(_) => e,
                other => AssemblyBuilderError::VaultUnavailable(other.to_string()),
            })?
            .ok_or_else(|| AssemblyBuilderError::NotFound {
                code: code.to_string(),
            })?;
        self.reporter
            .info(format!("Found {code}: {}", resolution.name));

        let file = resolution.file;
        let reconciler = FreshnessReconciler::new(&self.config.timings);
        let outcome = match reconciler.ensure_local(vault, &file.local_path, file.kind) {
            Err(
                e @ (AssemblyBuilderError::FetchTimeout { .. }
                | AssemblyBuilderError::StaleLocalCopy { .. }),
            ) => {
                warn!(error = %e, "retrying fetch");
                reconciler.ensure_local(vault, &file.local_path, file.kind)
            }
            other => other,
        };

        if outcome? == Freshness::Fetched {
            self.reporter
                .info(format!("Fetched latest revision of {}", file_label(&file)));
        }
        Ok(file)
    }

    /// Log in to the vault, retrying until it works or the run is cancelled.
    fn connect_vault(&self) -> Option<Box<dyn VaultSession>> {
        let name = &self.config.vault.name;
        let retry = self.config.vault.connect_retry;
        let mut attempt: u32 = 0;
        loop {
            if self.control.is_cancelled() {
                return None;
            }
            attempt += 1;
            match self.services.vault.login(name) {
                Ok(session) => {
                    self.reporter.success(format!("Connected to vault {name}"));
                    return Some(session);
                }
                Err(e) => {
                    self.reporter.warning(format!(
                        "Vault connection failed (attempt {attempt}): {e}; retrying in {}s",
                        retry.as_secs()
                    ));
                    if !self
                        .control
                        .sleep_unless_cancelled(retry, self.config.timings.pause_poll)
                    {
                        return None;
                    }
                }
            }
        }
    }

    /// Pause/cancel checkpoint. Returns `false` when the run must stop.
    fn checkpoint(&self, resume_status: RunStatus) -> bool {
        if self.control.is_cancelled() {
            return false;
        }
        if self.control.is_paused() {
            self.reporter.status(RunStatus::Paused);
            self.reporter.notice("Paused");
            if !self.control.wait_while_paused(self.config.timings.pause_poll) {
                return false;
            }
            self.reporter.notice("Resumed");
            self.reporter.status(resume_status);
        }
        true
    }

    fn clean<S: AsRef<str>>(&self, raw: &[S]) -> Vec<PartCode> {
        let cleaned = clean_codes(raw, self.config.dedupe, self.config.filter_noise);
        for dropped in &cleaned.dropped {
            match dropped.reason {
                DropReason::RowNumber => self
                    .reporter
                    .notice(format!("Skipped '{}' (looks like a row number)", dropped.token)),
                DropReason::Duplicate => debug!(token = %dropped.token, "duplicate code dropped"),
                DropReason::Empty => {}
            }
        }
        cleaned.codes
    }

    fn start_services(&self) -> ServiceGuards {
        let dialogs = self.services.dialogs.as_ref().and_then(|driver| {
            let rules = DialogRules {
                titles: self.config.dialog_titles.clone(),
                dismiss_texts: self.config.dismiss_texts.clone(),
                poll: self.config.dialog_poll,
            };
            DialogWatcher::start(Arc::clone(driver), rules)
                .map_err(|e| warn!(error = %e, "dialog watcher not started"))
                .ok()
        });

        let keepalive = match (&self.services.pinger, self.config.keepalive_interval) {
            (Some(pinger), Some(interval)) => KeepAlive::start(Arc::clone(pinger), interval)
                .map_err(|e| warn!(error = %e, "keep-alive not started"))
                .ok(),
            _ => None,
        };

        ServiceGuards {
            _dialogs: dialogs,
            _keepalive: keepalive,
        }
    }

    /// Emit the trailing summary lines and build the summary.
    fn finish(&self, status: RunStatus, tally: Tally) -> RunSummary {
        let stats = tally.current();
        if status == RunStatus::Cancelled && self.control.is_cancelled() {
            self.reporter.notice("Cancelled by user");
        }
        if !tally.not_found.is_empty() {
            let codes: Vec<&str> = tally.not_found.iter().map(PartCode::as_str).collect();
            self.reporter
                .warning(format!("Not found ({}): {}", codes.len(), codes.join(", ")));
        }
        if status == RunStatus::Completed {
            self.reporter
                .success(format!("Done: {} components added", stats.success));
            self.reporter.progress(1.0);
        }
        self.reporter.stats(stats);

        RunSummary {
            status,
            stats,
            not_found: tally.not_found,
            restarts: tally.restarts,
            finalize: tally.finalize,
            passes_completed: tally.passes_completed,
        }
    }
}

fn file_label(file: &ResolvedFile) -> String {
    file.local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.source_code.to_string())
}

// ---------------------------------------------------------------------------
// Worker thread
// ---------------------------------------------------------------------------

/// What a background run should build.
#[derive(Debug, Clone)]
pub enum RunRequest {
    Codes(Vec<String>),
    Kits(Vec<String>),
}

/// Caller-side handle to a run executing on its own worker thread.
pub struct RunHandle {
    pub run_id: RunId,
    control: RunControl,
    events: UnboundedReceiver<RunEvent>,
    worker: JoinHandle<RunSummary>,
}

impl RunHandle {
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Event stream; ends once the worker has finished and dropped its sender.
    pub fn events(&mut self) -> &mut UnboundedReceiver<RunEvent> {
        &mut self.events
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker. A worker that died without a summary reports `Stopped`.
    pub fn join(self) -> RunSummary {
        self.worker
            .join()
            .unwrap_or_else(|_| RunSummary::new(RunStatus::Stopped))
    }
}

/// Start a run on a dedicated worker thread.
pub fn start(
    config: RunConfig,
    services: RunServices,
    request: RunRequest,
    options: RunOptions,
) -> Result<RunHandle> {
    let (tx, events) = unbounded_channel();
    let control = RunControl::new();
    let run_id = RunId::new();
    let orchestrator = RunOrchestrator::new(config, services, control.clone(), RunReporter::new(tx));
    let span_run_id = run_id.clone();

    let worker = thread::Builder::new()
        .name("assemblybuilder-run".into())
        .spawn(move || {
            let _span = info_span!("run", run_id = %span_run_id).entered();
            match request {
                RunRequest::Codes(codes) => orchestrator.run(&codes, options),
                RunRequest::Kits(kits) => orchestrator.run_kits(&kits, options),
            }
        })
        .map_err(|e| AssemblyBuilderError::Worker(format!("run worker: {e}")))?;

    Ok(RunHandle {
        run_id,
        control,
        events,
        worker,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use assemblybuilder_host::{EntryPoint, SimHost};
    use assemblybuilder_shared::{AppConfig, Severity, Timings};
    use assemblybuilder_vault::{SimFile, SimVault};
    use uuid::Uuid;

    use super::*;
    use crate::kit::{Bom, BomLine, StaticBomSource};
    use crate::monitor::RunMonitor;

    struct Rig {
        root: PathBuf,
        vault: SimVault,
        host: SimHost,
        config: RunConfig,
    }

    impl Rig {
        fn new() -> Self {
            let root = std::env::temp_dir().join(format!("assemblybuilder-run-{}", Uuid::now_v7()));
            let mut config = RunConfig::try_from(&AppConfig::default()).unwrap();
            config.timings = Timings::immediate();
            config.vault.connect_retry = Duration::ZERO;
            let host = SimHost::new(&config.host);
            Self {
                vault: SimVault::new(&root),
                root,
                host,
                config,
            }
        }

        fn parts(&self, codes: &[&str]) {
            for code in codes {
                self.vault.add_file(
                    SimFile::new(format!("parts/{code}.sldprt"), 1).with_attribute("SAP No", *code),
                );
            }
        }

        fn services(&self) -> RunServices {
            RunServices::new(Arc::new(self.vault.clone()), Arc::new(self.host.clone()))
        }

        fn orchestrator(&self, services: RunServices) -> (RunOrchestrator, UnboundedReceiver<RunEvent>) {
            let (tx, rx) = unbounded_channel();
            let orchestrator = RunOrchestrator::new(
                self.config.clone(),
                services,
                RunControl::new(),
                RunReporter::new(tx),
            );
            (orchestrator, rx)
        }

        fn run(&self, codes: &[&str], options: RunOptions) -> (RunSummary, RunMonitor) {
            let (orchestrator, mut rx) = self.orchestrator(self.services());
            let summary = orchestrator.run(codes, options);
            let mut monitor = RunMonitor::new();
            monitor.drain(&mut rx);
            (summary, monitor)
        }
    }

    impl Drop for Rig {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    const IMMEDIATE: RunOptions = RunOptions {
        append_to_existing: false,
        abort_on_any_not_found: false,
    };

    const BATCH: RunOptions = RunOptions {
        append_to_existing: false,
        abort_on_any_not_found: true,
    };

    fn codes(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}", 2_001_000 + i)).collect()
    }

    fn as_strs(codes: &[String]) -> Vec<&str> {
        codes.iter().map(String::as_str).collect()
    }

    fn kit_bom(codes: &[&str]) -> Bom {
        Bom {
            header: None,
            lines: codes
                .iter()
                .map(|code| BomLine {
                    code: (*code).into(),
                    quantity: "1".into(),
                    description: String::new(),
                })
                .collect(),
        }
    }

    fn run_kits(
        rig: &Rig,
        boms: Arc<dyn BomSource>,
        kits: &[&str],
        options: RunOptions,
    ) -> (RunSummary, RunMonitor) {
        let (orchestrator, mut rx) = rig.orchestrator(rig.services().with_bom(boms));
        let summary = orchestrator.run_kits(kits, options);
        let mut monitor = RunMonitor::new();
        monitor.drain(&mut rx);
        (summary, monitor)
    }

    fn logged(monitor: &RunMonitor, needle: &str) -> bool {
        monitor
            .snapshot()
            .logs
            .iter()
            .any(|line| line.message.contains(needle))
    }

    #[test]
    fn total_counts_cleaned_distinct_codes() {
        let rig = Rig::new();
        rig.parts(&["2001234"]);

        let (summary, monitor) = rig.run(&["100", "2001234", "2001234", "5"], IMMEDIATE);

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.stats.total, 1);
        assert_eq!(summary.stats.success, 1);
        assert_eq!(monitor.snapshot().stats.total, 1);
        assert_eq!(monitor.snapshot().progress, 1.0);
        assert!(logged(&monitor, "Skipped '100'"));
    }

    #[test]
    fn offsets_step_by_exactly_one_increment() {
        let rig = Rig::new();
        let codes = codes(4);
        rig.parts(&as_strs(&codes));

        let (summary, _) = rig.run(&as_strs(&codes), BATCH);

        assert_eq!(summary.status, RunStatus::Completed);
        let z = rig.host.placements_z();
        assert_eq!(z.len(), 4);
        for pair in z.windows(2) {
            assert!((pair[0] - pair[1] - 0.3).abs() < 1e-9);
        }
        assert_eq!(z[0], 0.0);
    }

    #[test]
    fn connection_lost_restarts_from_first_code() {
        let rig = Rig::new();
        let codes = codes(5);
        rig.parts(&as_strs(&codes));
        rig.host.disconnect_on_insert(3);

        let (summary, monitor) = rig.run(&as_strs(&codes), IMMEDIATE);

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.restarts, 1);
        assert_eq!(summary.stats.success, 5);

        let names = rig.host.placement_names();
        assert_eq!(names.len(), 7);
        assert_eq!(names[2], format!("{}-1", codes[0]));
        assert_eq!(rig.host.placements_z()[2], 0.0);
        assert!(logged(&monitor, "all parts will be re-added"));
    }

    #[test]
    fn dead_host_mid_batch_discards_progress() {
        let rig = Rig::new();
        let codes = codes(10);
        rig.parts(&as_strs(&codes));
        rig.host.crash_after_inserts(3);

        let (summary, _) = rig.run(&as_strs(&codes), BATCH);

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.restarts, 1);
        assert_eq!(summary.stats.success, 10);
        assert!(summary.stats.success + summary.stats.error <= summary.stats.total);

        let names = rig.host.placement_names();
        assert_eq!(names.len(), 13);
        assert_eq!(names[3], format!("{}-1", codes[0]));
        assert_eq!(rig.host.placements_z()[3], 0.0);
        assert_eq!(rig.host.launch_count(), 2);
    }

    #[test]
    fn not_found_is_reported_once_and_never_inserted() {
        let mut rig = Rig::new();
        rig.config.dedupe = false;
        rig.parts(&["2001234", "2001235"]);

        let (summary, monitor) = rig.run(&["2001234", "7777777", "7777777", "2001235"], IMMEDIATE);

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.not_found, vec![PartCode::from("7777777")]);
        assert_eq!(summary.stats.total, 4);
        assert_eq!(summary.stats.success, 2);
        assert_eq!(summary.stats.error, 1);
        assert!(rig.host.placement_names().iter().all(|n| !n.starts_with("7777777")));
        assert_eq!(monitor.snapshot().not_found.len(), 1);
        assert!(logged(&monitor, "Not found (1): 7777777"));
    }

    #[test]
    fn not_found_survives_restart_exactly_once() {
        let rig = Rig::new();
        rig.parts(&["2001234", "2001235"]);
        rig.host.disconnect_on_insert(2);

        let (summary, _) = rig.run(&["2001234", "7777777", "2001235"], IMMEDIATE);

        assert_eq!(summary.restarts, 1);
        assert_eq!(summary.not_found.len(), 1);
        assert_eq!(summary.stats.success, 2);
        assert_eq!(summary.stats.error, 1);
    }

    #[test]
    fn vault_session_dying_mid_lookup_reconnects_and_retries() {
        let rig = Rig::new();
        let codes = codes(3);
        rig.parts(&as_strs(&codes));
        rig.vault.drop_next_session_after(2);

        let (summary, monitor) = rig.run(&as_strs(&codes), IMMEDIATE);

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.stats.success, 3);
        assert!(summary.not_found.is_empty());
        assert_eq!(rig.vault.login_attempts(), 2);
        assert!(logged(&monitor, "reconnecting"));
    }

    #[test]
    fn dropped_vault_session_never_fakes_missing_parts_in_batch() {
        let rig = Rig::new();
        let codes = codes(3);
        rig.parts(&as_strs(&codes));
        rig.vault.drop_next_session_after(8);

        let (summary, _) = rig.run(&as_strs(&codes), BATCH);

        assert_eq!(summary.status, RunStatus::Completed);
        assert!(summary.not_found.is_empty());
        assert_eq!(summary.stats.success, 3);
        assert_eq!(rig.vault.login_attempts(), 2);
    }

    #[test]
    fn copy_still_behind_after_fetch_is_not_inserted() {
        let rig = Rig::new();
        rig.parts(&["2001234"]);
        rig.vault.serve_outdated_fetches(true);

        let (summary, monitor) = rig.run(&["2001234"], IMMEDIATE);

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.not_found, vec![PartCode::from("2001234")]);
        assert_eq!(rig.vault.fetch_count(), 2);
        assert!(rig.host.placement_names().is_empty());
        assert!(logged(&monitor, "local copy is stale"));
    }

    #[test]
    fn batch_with_missing_codes_never_touches_host() {
        let rig = Rig::new();
        rig.parts(&["2001234"]);

        let (summary, monitor) = rig.run(&["2001234", "7777777"], BATCH);

        assert_eq!(summary.status, RunStatus::Cancelled);
        assert_eq!(summary.not_found, vec![PartCode::from("7777777")]);
        assert_eq!(rig.host.launch_count(), 0);
        assert!(rig.host.placement_names().is_empty());
        assert!(logged(&monitor, "nothing was inserted: 7777777"));
    }

    #[test]
    fn empty_input_is_an_error() {
        let rig = Rig::new();
        let (summary, monitor) = rig.run(&["1", " ", "22."], IMMEDIATE);
        assert_eq!(summary.status, RunStatus::Error);
        assert_eq!(monitor.snapshot().status, RunStatus::Error);
        assert_eq!(rig.vault.login_attempts(), 0);
    }

    #[test]
    fn vault_login_is_retried_until_it_works() {
        let rig = Rig::new();
        rig.parts(&["2001234"]);
        rig.vault.fail_logins(3);

        let (summary, monitor) = rig.run(&["2001234"], IMMEDIATE);

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(rig.vault.login_attempts(), 4);
        assert!(logged(&monitor, "Vault connection failed (attempt 3)"));
    }

    #[test]
    fn cancellation_skips_finalizer() {
        let rig = Rig::new();
        rig.parts(&["2001234"]);
        let (orchestrator, _rx) = rig.orchestrator(rig.services());
        orchestrator.control().cancel();

        let summary = orchestrator.run(&["2001234"], IMMEDIATE);

        assert_eq!(summary.status, RunStatus::Cancelled);
        assert!(summary.finalize.is_none());
        assert!(!rig.host.view_set());
    }

    #[test]
    fn pause_holds_progress_until_resumed() {
        let rig = Rig::new();
        rig.parts(&["2001234"]);
        let (orchestrator, mut rx) = rig.orchestrator(rig.services());
        let control = orchestrator.control().clone();
        control.pause();

        let worker = thread::spawn(move || orchestrator.run(&["2001234"], IMMEDIATE));

        let mut paused = false;
        for _ in 0..2000 {
            match rx.try_recv() {
                Ok(RunEvent::Status(RunStatus::Paused)) => {
                    paused = true;
                    break;
                }
                Ok(_) => {}
                Err(_) => thread::sleep(Duration::from_millis(1)),
            }
        }
        assert!(paused);
        assert!(rig.host.placement_names().is_empty());

        control.resume();
        let summary = worker.join().unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(rig.host.placement_names().len(), 1);
    }

    #[test]
    fn unlaunchable_host_is_an_error() {
        let mut rig = Rig::new();
        rig.config.host.launch_timeout = Duration::ZERO;
        rig.parts(&["2001234"]);
        rig.host.launch_unresponsive(true);

        let (summary, monitor) = rig.run(&["2001234"], IMMEDIATE);

        assert_eq!(summary.status, RunStatus::Error);
        assert!(logged(&monitor, "host unavailable"));
    }

    #[test]
    fn refused_assembly_is_an_error() {
        let rig = Rig::new();
        rig.parts(&["2001234"]);
        rig.host.refuse_new_documents(true);

        let (summary, _) = rig.run(&["2001234"], IMMEDIATE);
        assert_eq!(summary.status, RunStatus::Error);
    }

    #[test]
    fn restarts_are_bounded() {
        let mut rig = Rig::new();
        rig.config.host.max_session_restarts = 0;
        let codes = codes(3);
        rig.parts(&as_strs(&codes));
        rig.host.disconnect_on_insert(2);

        let (summary, monitor) = rig.run(&as_strs(&codes), IMMEDIATE);

        assert_eq!(summary.status, RunStatus::Error);
        assert!(logged(&monitor, "gave up after 0 restarts"));
    }

    #[test]
    fn restart_limit_applies_per_kit() {
        let mut rig = Rig::new();
        rig.config.host.max_session_restarts = 1;
        rig.parts(&["2001001", "2001002", "2001003", "2001004"]);
        // Kit one loses its second insertion; kit two's first insertion
        // (the fourth over the host's lifetime) takes the process down.
        rig.host.disconnect_on_insert(2);
        rig.host.crash_after_inserts(4);
        let mut boms = StaticBomSource::default();
        boms.insert("9000001", kit_bom(&["2001001", "2001002"]));
        boms.insert("9000002", kit_bom(&["2001003", "2001004"]));

        let (summary, _) = run_kits(&rig, Arc::new(boms), &["9000001", "9000002"], BATCH);

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.restarts, 2);
        assert_eq!(summary.passes_completed, 2);
        assert_eq!(summary.stats.success, 4);
    }

    #[test]
    fn kits_reconnect_a_dropped_vault_session() {
        let rig = Rig::new();
        rig.parts(&["2001001", "2001002"]);
        rig.vault.drop_next_session_after(2);
        let mut boms = StaticBomSource::default();
        boms.insert("9000001", kit_bom(&["2001001"]));
        boms.insert("9000002", kit_bom(&["2001002"]));

        let (summary, monitor) = run_kits(&rig, Arc::new(boms), &["9000001", "9000002"], BATCH);

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.passes_completed, 2);
        assert!(summary.not_found.is_empty());
        assert_eq!(rig.vault.login_attempts(), 2);
        assert!(logged(&monitor, "reconnecting"));
    }

    #[test]
    fn append_restart_stays_on_the_pinned_assembly() {
        let mut rig = Rig::new();
        rig.host = SimHost::running(&rig.config.host);
        let codes = codes(3);
        rig.parts(&as_strs(&codes));
        rig.host.add_open_assembly("Other.SLDASM", &[]);
        rig.host.add_open_assembly("Frame.SLDASM", &["x-1"]);
        rig.host.drop_call_on_insert(2);

        let options = RunOptions {
            append_to_existing: true,
            abort_on_any_not_found: false,
        };
        let (summary, monitor) = rig.run(&as_strs(&codes), options);

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.restarts, 1);
        assert_eq!(rig.host.component_names("Frame.SLDASM").len(), 5);
        assert!(rig.host.component_names("Other.SLDASM").is_empty());
        assert_eq!(rig.host.launch_count(), 0);
        assert!(logged(&monitor, "Adding to Frame.SLDASM: 2 existing components"));
    }

    #[test]
    fn finalizer_runs_once_on_completion() {
        let rig = Rig::new();
        let codes = codes(3);
        rig.parts(&as_strs(&codes));

        let (summary, monitor) = rig.run(&as_strs(&codes), IMMEDIATE);

        let report = summary.finalize.expect("finalized");
        assert_eq!(report.components, 3);
        assert_eq!(rig.host.flexible_components().len(), 3);
        assert!(rig.host.view_set());
        assert!(logged(&monitor, "Done: 3 components added"));
    }

    #[test]
    fn append_starts_after_existing_components() {
        let mut rig = Rig::new();
        rig.host = SimHost::running(&rig.config.host);
        rig.parts(&["2001234"]);
        rig.host.add_open_assembly("Frame.SLDASM", &["x-1", "y-1"]);

        let options = RunOptions {
            append_to_existing: true,
            abort_on_any_not_found: false,
        };
        let (summary, _) = rig.run(&["2001234"], options);

        assert_eq!(summary.status, RunStatus::Completed);
        assert!((rig.host.placements_z()[0] - (-0.6)).abs() < 1e-9);
        assert_eq!(rig.host.component_names("Frame.SLDASM").len(), 3);
    }

    #[test]
    fn failed_insertions_are_counted_and_skipped() {
        let rig = Rig::new();
        let codes = codes(2);
        rig.parts(&as_strs(&codes));
        for entry_point in EntryPoint::PRIORITY {
            rig.host.fail_entry_point(entry_point);
        }

        let (summary, monitor) = rig.run(&as_strs(&codes), IMMEDIATE);

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.stats.error, 2);
        assert_eq!(summary.stats.success, 0);
        assert_eq!(summary.restarts, 0);
        assert!(logged(&monitor, "insertion failed"));
    }

    #[test]
    fn batch_can_abort_on_insert_failure() {
        let mut rig = Rig::new();
        rig.config.abort_on_insert_failure = true;
        let codes = codes(2);
        rig.parts(&as_strs(&codes));
        for entry_point in EntryPoint::PRIORITY {
            rig.host.fail_entry_point(entry_point);
        }

        let (summary, _) = rig.run(&as_strs(&codes), BATCH);
        assert_eq!(summary.status, RunStatus::Error);
        assert_eq!(summary.stats.error, 1);
    }

    #[test]
    fn kits_build_one_assembly_each() {
        let rig = Rig::new();
        rig.parts(&["2001001", "2001002", "2001003"]);
        let mut boms = StaticBomSource::default();
        let line = |code: &str| BomLine {
            code: code.into(),
            quantity: "1".into(),
            description: String::new(),
        };
        boms.insert(
            "9000001",
            Bom {
                header: None,
                lines: vec![line("1"), line("2001001"), line("2001002")],
            },
        );
        boms.insert(
            "9000002",
            Bom {
                header: None,
                lines: vec![line("2001003")],
            },
        );
        let services = rig.services().with_bom(Arc::new(boms));
        let (orchestrator, mut rx) = rig.orchestrator(services);

        let summary = orchestrator.run_kits(&["9000001", "9000404", "9000002"], BATCH);
        let mut monitor = RunMonitor::new();
        monitor.drain(&mut rx);

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.passes_completed, 2);
        assert_eq!(summary.stats.total, 3);
        assert_eq!(summary.stats.success, 3);
        assert_eq!(rig.host.component_names("Assem1").len(), 2);
        assert_eq!(rig.host.component_names("Assem2").len(), 1);
        assert!(logged(&monitor, "9000404"));
        assert!(logged(&monitor, "NO | COMPONENT"));
        assert_eq!(monitor.snapshot().progress, 1.0);
    }

    #[test]
    fn kits_without_bom_source_are_an_error() {
        let rig = Rig::new();
        let (orchestrator, _rx) = rig.orchestrator(rig.services());
        let summary = orchestrator.run_kits(&["9000001"], BATCH);
        assert_eq!(summary.status, RunStatus::Error);
    }

    struct PanickingVault;

    impl VaultConnector for PanickingVault {
        fn login(&self, _vault_name: &str) -> Result<Box<dyn VaultSession>> {
            panic!("vault binding exploded");
        }
    }

    #[test]
    fn internal_errors_end_in_error_status() {
        let rig = Rig::new();
        let services = RunServices::new(Arc::new(PanickingVault), Arc::new(rig.host.clone()));
        let (orchestrator, mut rx) = rig.orchestrator(services);

        let summary = orchestrator.run(&["2001234"], IMMEDIATE);
        let mut monitor = RunMonitor::new();
        monitor.drain(&mut rx);

        assert_eq!(summary.status, RunStatus::Error);
        assert_eq!(monitor.snapshot().status, RunStatus::Error);
        let last = monitor.snapshot().logs.back().expect("log line");
        assert_eq!(last.severity, Severity::Error);
        assert!(last.message.contains("vault binding exploded"));
    }

    /// Serves the first kit, then blows up.
    struct ExplodingBoms {
        first: Bom,
    }

    impl BomSource for ExplodingBoms {
        fn bom(&self, kit_code: &str) -> Result<Bom> {
            if kit_code == "9000001" {
                return Ok(self.first.clone());
            }
            panic!("erp binding exploded");
        }
    }

    #[test]
    fn panicked_run_keeps_what_it_gathered() {
        let rig = Rig::new();
        rig.parts(&["2001001"]);
        let boms = ExplodingBoms {
            first: kit_bom(&["2001001", "7777777"]),
        };

        let (summary, monitor) = run_kits(&rig, Arc::new(boms), &["9000001", "9000002"], IMMEDIATE);

        assert_eq!(summary.status, RunStatus::Error);
        assert_eq!(summary.passes_completed, 1);
        assert_eq!(summary.stats.success, 1);
        assert_eq!(summary.stats.total, 2);
        assert_eq!(summary.not_found, vec![PartCode::from("7777777")]);
        assert!(logged(&monitor, "erp binding exploded"));
        assert!(logged(&monitor, "Not found (1): 7777777"));
        assert_eq!(monitor.snapshot().stats.success, 1);
    }

    #[test]
    fn background_run_streams_events() {
        let rig = Rig::new();
        rig.parts(&["2001234"]);

        let mut handle = start(
            rig.config.clone(),
            rig.services(),
            RunRequest::Codes(vec!["2001234".into()]),
            IMMEDIATE,
        )
        .unwrap();

        let mut monitor = RunMonitor::new();
        while !handle.is_finished() {
            monitor.drain(handle.events());
            thread::sleep(Duration::from_millis(1));
        }
        monitor.drain(handle.events());
        let summary = handle.join();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(monitor.summary().map(|s| s.status), Some(RunStatus::Completed));
        assert_eq!(monitor.snapshot().stats.success, 1);
        let (lines, _) = monitor.logs_since(0);
        assert!(lines.iter().any(|l| l.message.contains("Connected to vault")));
    }
}
