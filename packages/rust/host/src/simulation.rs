//! In-memory host used by tests and by the CLI's catalog mode.
//!
//! Models one host process at a time. Handles remember the process generation
//! they were created for, so a handle from before a crash stays dead even after
//! a relaunch. Failures are produced as raw automation messages and classified
//! against the configured disconnect signatures, the way a real adapter does.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use assemblybuilder_shared::{AssemblyBuilderError, HostFailure, HostSettings, Result};

use crate::client::{
    ComponentRef, DocumentKind, EntryPoint, HostApp, HostConnector, HostDocument, InsertCall,
};

const DISCONNECTED_MESSAGE: &str =
    "(-2147417848, 'The object invoked has disconnected from its clients.')";
const UNRESPONSIVE_MESSAGE: &str = "The RPC server is unavailable.";
const DEFAULT_TEMPLATE: &str = "assembly.asmdot";

#[derive(Debug, Clone)]
struct SimDoc {
    title: String,
    kind: DocumentKind,
    components: Vec<ComponentRef>,
    configurations: Vec<String>,
}

#[derive(Debug)]
struct SimHostState {
    settings: HostSettings,
    running: bool,
    responsive: bool,
    generation: u64,
    launches: u32,
    launch_unresponsive: bool,
    refuse_new: bool,
    documents: Vec<SimDoc>,
    active: Option<String>,
    new_counter: u32,
    failing: HashSet<EntryPoint>,
    missing: HashSet<EntryPoint>,
    silent: HashSet<EntryPoint>,
    disconnect_on_insert: Option<usize>,
    drop_call_on_insert: Option<usize>,
    crash_after_inserts: Option<usize>,
    total_inserted: usize,
    placements: Vec<(String, f64)>,
    last_configuration: Option<String>,
    closed: Vec<String>,
    finalize_failures: HashSet<String>,
    unfixed: Vec<String>,
    flexible: Vec<String>,
    view_set: bool,
}

impl SimHostState {
    fn raw_failure(&self, message: &str) -> AssemblyBuilderError {
        let kind = HostFailure::classify(message, &self.settings.disconnect_signatures);
        AssemblyBuilderError::host(kind, message)
    }

    fn check_alive(&self, generation: u64) -> Result<()> {
        if !self.running || generation != self.generation {
            return Err(self.raw_failure(DISCONNECTED_MESSAGE));
        }
        if !self.responsive {
            return Err(self.raw_failure(UNRESPONSIVE_MESSAGE));
        }
        Ok(())
    }

    fn document(&self, title: &str) -> Option<&SimDoc> {
        self.documents.iter().find(|d| d.title == title)
    }

    fn document_mut(&mut self, title: &str) -> Result<&mut SimDoc> {
        let message = format!("document '{title}' is not open");
        match self.documents.iter().position(|d| d.title == title) {
            Some(i) => Ok(&mut self.documents[i]),
            None => Err(self.raw_failure(&message)),
        }
    }

    fn crash(&mut self) {
        self.running = false;
        self.documents.clear();
        self.active = None;
    }
}

/// Handle to a simulated host. Cloning shares the same state.
#[derive(Debug, Clone)]
pub struct SimHost {
    state: Arc<Mutex<SimHostState>>,
}

impl SimHost {
    /// A host with no process running; the first acquisition launches one.
    pub fn new(settings: &HostSettings) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimHostState {
                settings: settings.clone(),
                running: false,
                responsive: true,
                generation: 0,
                launches: 0,
                launch_unresponsive: false,
                refuse_new: false,
                documents: Vec::new(),
                active: None,
                new_counter: 0,
                failing: HashSet::new(),
                missing: HashSet::new(),
                silent: HashSet::new(),
                disconnect_on_insert: None,
                drop_call_on_insert: None,
                crash_after_inserts: None,
                total_inserted: 0,
                placements: Vec::new(),
                last_configuration: None,
                closed: Vec::new(),
                finalize_failures: HashSet::new(),
                unfixed: Vec::new(),
                flexible: Vec::new(),
                view_set: false,
            })),
        }
    }

    /// A host whose process is already running with no documents open.
    pub fn running(settings: &HostSettings) -> Self {
        let host = Self::new(settings);
        {
            let mut state = host.state();
            state.running = true;
            state.generation = 1;
        }
        host
    }

    fn state(&self) -> MutexGuard<'_, SimHostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn app(&self, generation: u64) -> Box<dyn HostApp> {
        Box::new(SimApp {
            host: self.clone(),
            generation,
        })
    }

    fn document_handle(&self, generation: u64, title: &str) -> Box<dyn HostDocument> {
        Box::new(SimDocument {
            host: self.clone(),
            generation,
            title: title.to_string(),
        })
    }

    // -- fault injection ----------------------------------------------------

    /// Make `entry_point` reject every call.
    pub fn fail_entry_point(&self, entry_point: EntryPoint) {
        self.state().failing.insert(entry_point);
    }

    /// Make `entry_point` unknown to the host, as on an older host version.
    pub fn remove_entry_point(&self, entry_point: EntryPoint) {
        self.state().missing.insert(entry_point);
    }

    /// Make `entry_point` insert the component but return no reference.
    pub fn silent_entry_point(&self, entry_point: EntryPoint) {
        self.state().silent.insert(entry_point);
    }

    /// The call that would make the `k`-th successful insertion (counted over
    /// the host's lifetime) fails with a disconnect and the process dies. One-shot.
    pub fn disconnect_on_insert(&self, k: usize) {
        self.state().disconnect_on_insert = Some(k);
    }

    /// Like [`SimHost::disconnect_on_insert`], but the process survives and
    /// keeps its open documents. One-shot.
    pub fn drop_call_on_insert(&self, k: usize) {
        self.state().drop_call_on_insert = Some(k);
    }

    /// The process dies right after the `n`-th successful insertion. One-shot.
    pub fn crash_after_inserts(&self, n: usize) {
        self.state().crash_after_inserts = Some(n);
    }

    pub fn refuse_new_documents(&self, refuse: bool) {
        self.state().refuse_new = refuse;
    }

    /// Launched processes never start answering calls.
    pub fn launch_unresponsive(&self, unresponsive: bool) {
        self.state().launch_unresponsive = unresponsive;
    }

    /// Make finalizer calls fail for the named component.
    pub fn fail_finalize_for(&self, component: &str) {
        self.state().finalize_failures.insert(component.to_string());
    }

    /// Kill the host process.
    pub fn crash(&self) {
        self.state().crash();
    }

    /// Open an assembly with the given component names and give it focus.
    pub fn add_open_assembly(&self, title: &str, components: &[&str]) {
        let mut state = self.state();
        state.documents.push(SimDoc {
            title: title.to_string(),
            kind: DocumentKind::Assembly,
            components: components
                .iter()
                .map(|name| ComponentRef {
                    name: (*name).to_string(),
                    path: None,
                })
                .collect(),
            configurations: vec!["Default".into()],
        });
        state.active = Some(title.to_string());
    }

    // -- inspection ---------------------------------------------------------

    pub fn launch_count(&self) -> u32 {
        self.state().launches
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn active_title(&self) -> Option<String> {
        self.state().active.clone()
    }

    pub fn open_titles(&self) -> Vec<String> {
        self.state().documents.iter().map(|d| d.title.clone()).collect()
    }

    pub fn closed_titles(&self) -> Vec<String> {
        self.state().closed.clone()
    }

    /// Component names of an open document, in insertion order.
    pub fn component_names(&self, title: &str) -> Vec<String> {
        self.state()
            .document(title)
            .map(|d| d.components.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Successful insertions over the host's lifetime.
    pub fn total_inserted(&self) -> usize {
        self.state().total_inserted
    }

    /// Z coordinate of every successful insertion, in order.
    pub fn placements_z(&self) -> Vec<f64> {
        self.state().placements.iter().map(|(_, z)| *z).collect()
    }

    /// Component name of every successful insertion, in order.
    pub fn placement_names(&self) -> Vec<String> {
        self.state()
            .placements
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Configuration passed with the most recent successful insertion.
    pub fn configuration_used(&self) -> Option<String> {
        self.state().last_configuration.clone()
    }

    pub fn flexible_components(&self) -> Vec<String> {
        self.state().flexible.clone()
    }

    pub fn view_set(&self) -> bool {
        self.state().view_set
    }
}

impl HostConnector for SimHost {
    fn attach_running(&self) -> Result<Option<Box<dyn HostApp>>> {
        let state = self.state();
        if !state.running {
            return Ok(None);
        }
        let generation = state.generation;
        drop(state);
        Ok(Some(self.app(generation)))
    }

    fn launch_new(&self) -> Result<Box<dyn HostApp>> {
        let mut state = self.state();
        state.crash();
        state.running = true;
        state.responsive = !state.launch_unresponsive;
        state.generation += 1;
        state.launches += 1;
        let generation = state.generation;
        drop(state);
        Ok(self.app(generation))
    }
}

struct SimApp {
    host: SimHost,
    generation: u64,
}

impl HostApp for SimApp {
    fn ping(&self) -> Result<()> {
        self.host.state().check_alive(self.generation)
    }

    fn open_document_titles(&self) -> Result<Vec<String>> {
        let state = self.host.state();
        state.check_alive(self.generation)?;
        Ok(state.documents.iter().map(|d| d.title.clone()).collect())
    }

    fn active_document(&self) -> Result<Option<Box<dyn HostDocument>>> {
        let state = self.host.state();
        state.check_alive(self.generation)?;
        let active = state.active.clone();
        drop(state);
        Ok(active.map(|title| self.host.document_handle(self.generation, &title)))
    }

    fn activate_document(&self, title: &str) -> Result<Option<Box<dyn HostDocument>>> {
        let mut state = self.host.state();
        state.check_alive(self.generation)?;
        if state.document(title).is_none() {
            return Ok(None);
        }
        state.active = Some(title.to_string());
        drop(state);
        Ok(Some(self.host.document_handle(self.generation, title)))
    }

    fn default_assembly_template(&self) -> Result<String> {
        self.host.state().check_alive(self.generation)?;
        Ok(DEFAULT_TEMPLATE.to_string())
    }

    fn new_document(&self, _template: &str, kind: DocumentKind) -> Result<Option<Box<dyn HostDocument>>> {
        let mut state = self.host.state();
        state.check_alive(self.generation)?;
        if state.refuse_new {
            return Ok(None);
        }
        state.new_counter += 1;
        let title = match kind {
            DocumentKind::Assembly => format!("Assem{}", state.new_counter),
            DocumentKind::Part => format!("Part{}", state.new_counter),
        };
        state.documents.push(SimDoc {
            title: title.clone(),
            kind,
            components: Vec::new(),
            configurations: vec!["Default".into()],
        });
        state.active = Some(title.clone());
        drop(state);
        Ok(Some(self.host.document_handle(self.generation, &title)))
    }

    fn open_document(&self, path: &Path, kind: DocumentKind) -> Result<Option<Box<dyn HostDocument>>> {
        let mut state = self.host.state();
        state.check_alive(self.generation)?;
        let Some(title) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Ok(None);
        };
        if state.document(&title).is_none() {
            state.documents.push(SimDoc {
                title: title.clone(),
                kind,
                components: Vec::new(),
                configurations: vec!["Default".into()],
            });
        }
        state.active = Some(title.clone());
        drop(state);
        Ok(Some(self.host.document_handle(self.generation, &title)))
    }

    fn close_document(&self, title: &str) -> Result<()> {
        let mut state = self.host.state();
        state.check_alive(self.generation)?;
        let Some(index) = state.documents.iter().position(|d| d.title == title) else {
            return Err(state.raw_failure(&format!("document '{title}' is not open")));
        };
        state.documents.remove(index);
        state.closed.push(title.to_string());
        if state.active.as_deref() == Some(title) {
            state.active = state.documents.last().map(|d| d.title.clone());
        }
        Ok(())
    }
}

struct SimDocument {
    host: SimHost,
    generation: u64,
    title: String,
}

impl SimDocument {
    fn with_doc<T>(&self, f: impl FnOnce(&mut SimDoc) -> T) -> Result<T> {
        let mut state = self.host.state();
        state.check_alive(self.generation)?;
        Ok(f(state.document_mut(&self.title)?))
    }

    fn finalize_step(&self, component: &ComponentRef, flexible: bool) -> Result<()> {
        let mut state = self.host.state();
        state.check_alive(self.generation)?;
        state.document_mut(&self.title)?;
        if state.finalize_failures.contains(&component.name) {
            return Err(state.raw_failure("component is suppressed"));
        }
        if flexible {
            state.flexible.push(component.name.clone());
        } else {
            state.unfixed.push(component.name.clone());
        }
        Ok(())
    }
}

impl HostDocument for SimDocument {
    fn title(&self) -> Result<String> {
        self.with_doc(|d| d.title.clone())
    }

    fn kind(&self) -> Result<DocumentKind> {
        self.with_doc(|d| d.kind)
    }

    fn configuration_names(&self) -> Result<Vec<String>> {
        self.with_doc(|d| d.configurations.clone())
    }

    fn components(&self) -> Result<Vec<ComponentRef>> {
        self.with_doc(|d| d.components.clone())
    }

    fn insert_component(&self, call: &InsertCall<'_>) -> Result<Option<ComponentRef>> {
        let mut state = self.host.state();
        state.check_alive(self.generation)?;

        if state.disconnect_on_insert == Some(state.total_inserted + 1) {
            state.disconnect_on_insert = None;
            state.crash();
            return Err(state.raw_failure(DISCONNECTED_MESSAGE));
        }
        if state.drop_call_on_insert == Some(state.total_inserted + 1) {
            state.drop_call_on_insert = None;
            return Err(state.raw_failure(DISCONNECTED_MESSAGE));
        }
        if state.missing.contains(&call.entry_point) {
            return Err(AssemblyBuilderError::host(
                HostFailure::Unsupported,
                format!("{} is not available on this host version", call.entry_point),
            ));
        }
        if state.failing.contains(&call.entry_point) {
            let message = format!("{} returned an error for {}", call.entry_point, call.path.display());
            return Err(state.raw_failure(&message));
        }

        let stem = call
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let document = state.document_mut(&self.title)?;
        let instance = document
            .components
            .iter()
            .filter(|c| c.name.rsplit_once('-').is_some_and(|(base, _)| base == stem))
            .count()
            + 1;
        let component = ComponentRef {
            name: format!("{stem}-{instance}"),
            path: Some(PathBuf::from(call.path)),
        };
        document.components.push(component.clone());

        state.total_inserted += 1;
        state
            .placements
            .push((component.name.clone(), call.placement.z()));
        state.last_configuration = call.configuration.map(String::from);

        if state.crash_after_inserts == Some(state.total_inserted) {
            state.crash_after_inserts = None;
            state.crash();
        }

        if state.silent.contains(&call.entry_point) {
            Ok(None)
        } else {
            Ok(Some(component))
        }
    }

    fn unfix_component(&self, component: &ComponentRef) -> Result<()> {
        self.finalize_step(component, false)
    }

    fn set_flexible(&self, component: &ComponentRef) -> Result<()> {
        self.finalize_step(component, true)
    }

    fn show_isometric_view(&self) -> Result<()> {
        self.with_doc(|_| ())?;
        self.host.state().view_set = true;
        Ok(())
    }

    fn zoom_to_fit(&self) -> Result<()> {
        self.with_doc(|_| ())
    }
}
