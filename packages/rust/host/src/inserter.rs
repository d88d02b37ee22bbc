//! Component Inserter: places one resolved file into the target assembly.
//!
//! Every (entry point, path variant) pair is tried in priority order until one
//! returns a component reference. Failures are collected as typed
//! [`AttemptError`]s and classified once at the end.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, info, instrument, warn};

use assemblybuilder_shared::{AssemblyBuilderError, FileKind, HostSettings, Timings};

use crate::client::{
    ComponentRef, DocumentKind, EntryPoint, HostApp, HostDocument, InsertCall, Placement,
    Transform,
};
use crate::paths::PathVariants;
use crate::session::AssemblySession;

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// The step of an insertion an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertStep {
    /// Opening the component document ahead of insertion.
    OpenComponent,
    /// A call to one insertion entry point.
    Strategy(EntryPoint),
    /// Re-enumerating components after every entry point failed.
    Reconcile,
}

impl std::fmt::Display for InsertStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenComponent => f.write_str("open"),
            Self::Strategy(entry_point) => entry_point.fmt(f),
            Self::Reconcile => f.write_str("reconcile"),
        }
    }
}

/// One captured failure.
#[derive(Debug)]
pub struct AttemptError {
    pub step: InsertStep,
    pub path: PathBuf,
    pub error: AssemblyBuilderError,
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.step, self.path.display(), self.error)
    }
}

/// Result of one insertion attempt.
#[derive(Debug)]
pub enum InsertionOutcome {
    Inserted(ComponentRef),
    /// Every strategy and the reconciliation pass failed on a live host.
    Failed(Vec<AttemptError>),
    /// The host went away during the attempt.
    ConnectionLost,
}

impl InsertionOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Outcome plus the bookkeeping the orchestrator logs.
#[derive(Debug)]
pub struct InsertionReport {
    pub outcome: InsertionOutcome,
    /// Errors captured along the way, including ones a later strategy recovered from.
    pub errors: Vec<AttemptError>,
    /// Z coordinate the component was placed at.
    pub offset_used: f64,
    /// Z coordinate for the next component.
    pub next_offset: f64,
    /// Entry point that produced the component, if a strategy succeeded directly.
    pub entry_point: Option<EntryPoint>,
}

// ---------------------------------------------------------------------------
// Combinator
// ---------------------------------------------------------------------------

/// Try `attempt` on each candidate until one yields a value.
///
/// `Ok(None)` moves on silently; errors are pushed to `errors`. Iteration stops
/// early when `is_fatal` says an error makes further attempts pointless.
pub fn first_success<C, T, E>(
    candidates: impl IntoIterator<Item = C>,
    errors: &mut Vec<E>,
    is_fatal: impl Fn(&E) -> bool,
    mut attempt: impl FnMut(&C) -> std::result::Result<Option<T>, E>,
) -> Option<(C, T)> {
    for candidate in candidates {
        match attempt(&candidate) {
            Ok(Some(value)) => return Some((candidate, value)),
            Ok(None) => {}
            Err(error) => {
                let fatal = is_fatal(&error);
                errors.push(error);
                if fatal {
                    return None;
                }
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Inserter
// ---------------------------------------------------------------------------

/// Inserts components into an [`AssemblySession`] and advances its offset.
pub struct ComponentInserter<'a> {
    settings: &'a HostSettings,
    timings: &'a Timings,
}

impl<'a> ComponentInserter<'a> {
    pub fn new(settings: &'a HostSettings, timings: &'a Timings) -> Self {
        Self { settings, timings }
    }

    /// Insert the file at `path` at the session's current offset.
    ///
    /// On success the session's offset moves one step further along -Z and
    /// transient documents opened along the way are closed.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn insert(
        &self,
        app: &dyn HostApp,
        session: &mut AssemblySession,
        path: &Path,
        kind: FileKind,
    ) -> InsertionReport {
        let offset = session.placement_offset;
        let variants = PathVariants::build(path, app.short_path_name(path));
        let mut errors: Vec<AttemptError> = Vec::new();

        let existing_names: HashSet<String> = session
            .document
            .components()
            .map(|components| components.into_iter().map(|c| c.name).collect())
            .unwrap_or_default();

        let opened = self.open_component(app, &variants, kind, &mut errors);
        let configuration = opened.as_ref().and_then(|(_, config)| config.clone());
        let component_title = opened.and_then(|(title, _)| title);

        let transform = Transform::along_z(offset);
        let attempts = EntryPoint::PRIORITY
            .iter()
            .flat_map(|entry_point| variants.candidates().iter().map(move |p| (*entry_point, p)));

        let document = session.document.as_ref();
        let mut unsupported: HashSet<EntryPoint> = HashSet::new();
        let direct = first_success(
            attempts,
            &mut errors,
            |e: &AttemptError| e.error.is_disconnect(),
            |(entry_point, candidate)| {
                if unsupported.contains(entry_point) {
                    return Ok(None);
                }
                let placement = if entry_point.takes_transform() {
                    Placement::Transform(transform)
                } else {
                    Placement::Offset { x: 0.0, y: 0.0, z: offset }
                };
                let call = InsertCall {
                    entry_point: *entry_point,
                    path: candidate,
                    placement,
                    configuration: configuration
                        .as_deref()
                        .filter(|_| entry_point.takes_configuration()),
                };
                document.insert_component(&call).map_err(|error| {
                    if error.is_unsupported() {
                        debug!(%entry_point, "entry point not available, skipping its other paths");
                        unsupported.insert(*entry_point);
                    }
                    AttemptError {
                        step: InsertStep::Strategy(*entry_point),
                        path: candidate.to_path_buf(),
                        error,
                    }
                })
            },
        );

        let lost = errors.iter().any(|e| e.error.is_disconnect());
        let (component, entry_point) = match direct {
            Some(((entry_point, _), component)) => (Some(component), Some(entry_point)),
            None if lost => (None, None),
            None => (reconcile(document, &variants, &existing_names, path, &mut errors), None),
        };

        let outcome = match component {
            Some(component) => {
                thread::sleep(self.timings.insert_settle);
                session.placement_offset = offset - self.settings.offset_step_m;
                info!(
                    component = %component.name,
                    z = offset,
                    entry_point = ?entry_point,
                    "component inserted"
                );
                InsertionOutcome::Inserted(component)
            }
            None if errors.iter().any(|e| e.error.is_disconnect()) => {
                warn!("host connection lost during insertion");
                InsertionOutcome::ConnectionLost
            }
            None => {
                warn!(attempts = errors.len(), "every insertion strategy failed");
                InsertionOutcome::Failed(std::mem::take(&mut errors))
            }
        };

        if !matches!(outcome, InsertionOutcome::ConnectionLost) {
            close_transient_documents(app, session, path, component_title.as_deref());
        }

        InsertionReport {
            outcome,
            errors,
            offset_used: offset,
            next_offset: session.placement_offset,
            entry_point,
        }
    }

    /// Open the component once so the vault hook runs; returns its title and
    /// first configuration name.
    fn open_component(
        &self,
        app: &dyn HostApp,
        variants: &PathVariants,
        kind: FileKind,
        errors: &mut Vec<AttemptError>,
    ) -> Option<(Option<String>, Option<String>)> {
        let doc_kind = DocumentKind::from(kind);
        let (_, document) = first_success(
            variants.candidates(),
            errors,
            |e: &AttemptError| e.error.is_disconnect(),
            |candidate| {
                app.open_document(candidate, doc_kind).map_err(|error| AttemptError {
                    step: InsertStep::OpenComponent,
                    path: candidate.to_path_buf(),
                    error,
                })
            },
        )?;

        thread::sleep(self.timings.open_settle);

        let title = document.title().ok();
        let configuration = document
            .configuration_names()
            .ok()
            .and_then(|names| names.into_iter().next())
            .filter(|name| !name.is_empty());
        debug!(?title, ?configuration, "component document opened");
        Some((title, configuration))
    }
}

/// Find a component the host inserted without returning a reference.
fn reconcile(
    document: &dyn HostDocument,
    variants: &PathVariants,
    existing_names: &HashSet<String>,
    path: &Path,
    errors: &mut Vec<AttemptError>,
) -> Option<ComponentRef> {
    match document.components() {
        Ok(components) => components.into_iter().find(|c| {
            c.path.as_deref().is_some_and(|p| variants.matches(p))
                || (!c.name.is_empty() && !existing_names.contains(&c.name))
        }),
        Err(error) => {
            errors.push(AttemptError {
                step: InsertStep::Reconcile,
                path: path.to_path_buf(),
                error,
            });
            None
        }
    }
}

/// Close documents opened as a side effect, never the target assembly.
fn close_transient_documents(
    app: &dyn HostApp,
    session: &AssemblySession,
    path: &Path,
    component_title: Option<&str>,
) {
    let assembly = session.locked_title.as_str();
    let mut to_close: Vec<String> = Vec::new();
    let mut push = |title: &str| {
        if !title.is_empty() && title != assembly && !to_close.iter().any(|t| t == title) {
            to_close.push(title.to_string());
        }
    };

    if let Some(title) = component_title {
        push(title);
    }
    if let Some(name) = path.file_name() {
        push(&name.to_string_lossy());
    }
    if let Ok(open) = app.open_document_titles() {
        for title in open
            .iter()
            .filter(|t| !session.pre_existing_open_titles.contains(*t))
        {
            push(title);
        }
    }

    for title in &to_close {
        if let Err(e) = app.close_document(title) {
            debug!(%title, error = %e, "could not close transient document");
        }
    }
}
