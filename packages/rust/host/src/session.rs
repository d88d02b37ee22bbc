//! Host Session Manager: acquires the host process and the target assembly.
//!
//! The target assembly's title is pinned for the whole run. The host may move
//! focus during long automated sequences, so every step re-activates the
//! pinned title instead of trusting the active document.

use std::collections::HashSet;
use std::thread;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use assemblybuilder_shared::{AssemblyBuilderError, HostSettings, Result, Timings};

use crate::client::{DocumentKind, HostApp, HostConnector, HostDocument};

/// Which assembly document a session should target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyTarget {
    /// A specific open assembly, by title.
    Locked(String),
    /// Whatever assembly is already open; a new one is created if none is.
    ExistingOpen,
    /// A fresh assembly created from the template.
    New,
}

/// The one live target assembly of a run.
///
/// Replaced wholesale on session loss, never patched in place.
pub struct AssemblySession {
    pub document: Box<dyn HostDocument>,
    /// Title every step re-activates before touching the document.
    pub locked_title: String,
    /// Z coordinate for the next component, in metres.
    pub placement_offset: f64,
    /// Documents that were open before the run touched anything.
    pub pre_existing_open_titles: HashSet<String>,
    /// Component count found when the session was acquired.
    pub initial_component_count: usize,
    /// Whether the assembly was created for this session.
    pub created: bool,
}

impl std::fmt::Debug for AssemblySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssemblySession")
            .field("locked_title", &self.locked_title)
            .field("placement_offset", &self.placement_offset)
            .field("initial_component_count", &self.initial_component_count)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

/// Acquires and validates host handles.
pub struct HostSessionManager<'a> {
    settings: &'a HostSettings,
    timings: &'a Timings,
}

impl<'a> HostSessionManager<'a> {
    pub fn new(settings: &'a HostSettings, timings: &'a Timings) -> Self {
        Self { settings, timings }
    }

    /// Attach to a running host, or launch one and wait until it answers.
    #[instrument(skip_all)]
    pub fn acquire_app(&self, connector: &dyn HostConnector) -> Result<Box<dyn HostApp>> {
        match connector.attach_running() {
            Ok(Some(app)) if app.ping().is_ok() => {
                info!("attached to running host");
                return Ok(app);
            }
            Ok(_) => debug!("no usable running host"),
            Err(e) => debug!(error = %e, "attach failed"),
        }

        info!("launching host");
        let app = connector
            .launch_new()
            .map_err(|e| AssemblyBuilderError::HostUnavailable(e.to_string()))?;

        let deadline = Instant::now() + self.settings.launch_timeout;
        loop {
            match app.ping() {
                Ok(()) => return Ok(app),
                Err(e) if Instant::now() >= deadline => {
                    return Err(AssemblyBuilderError::HostUnavailable(format!(
                        "host did not become ready within {:?}: {e}",
                        self.settings.launch_timeout
                    )));
                }
                Err(_) => thread::sleep(self.timings.launch_poll),
            }
        }
    }

    /// Trivial property read; any failure counts as session death.
    pub fn is_alive(&self, app: &dyn HostApp) -> bool {
        app.ping().is_ok()
    }

    /// Obtain the target assembly and build a fresh session around it.
    ///
    /// Failing to obtain a valid assembly is fatal for the current attempt.
    #[instrument(skip_all, fields(target = ?target))]
    pub fn acquire_assembly(
        &self,
        app: &dyn HostApp,
        target: &AssemblyTarget,
    ) -> Result<AssemblySession> {
        let (document, created) = match target {
            AssemblyTarget::Locked(title) => {
                let document = activate_assembly(app, title)?.ok_or_else(|| {
                    AssemblyBuilderError::HostUnavailable(format!(
                        "assembly '{title}' is no longer open"
                    ))
                })?;
                (document, false)
            }
            AssemblyTarget::ExistingOpen => match find_open_assembly(app)? {
                Some(document) => (document, false),
                None => {
                    warn!("no open assembly found, creating a new one");
                    (self.create_assembly(app)?, true)
                }
            },
            AssemblyTarget::New => (self.create_assembly(app)?, true),
        };

        let locked_title = document.title()?;
        // Re-activate by title so the returned handle is the focused document.
        let document = activate_assembly(app, &locked_title)?.unwrap_or(document);

        let initial_component_count = if created {
            0
        } else {
            document.components().map(|c| c.len()).unwrap_or_else(|e| {
                warn!(error = %e, "could not count existing components");
                0
            })
        };
        let placement_offset = -(initial_component_count as f64) * self.settings.offset_step_m;

        let pre_existing_open_titles = app
            .open_document_titles()
            .map(|titles| titles.into_iter().collect())
            .unwrap_or_default();

        info!(
            title = %locked_title,
            created,
            components = initial_component_count,
            offset = placement_offset,
            "assembly session ready"
        );

        Ok(AssemblySession {
            document,
            locked_title,
            placement_offset,
            pre_existing_open_titles,
            initial_component_count,
            created,
        })
    }

    /// Re-activate the pinned assembly and refresh the session's handle.
    ///
    /// An error means the pinned document is gone and the session must be replaced.
    pub fn refresh(&self, app: &dyn HostApp, session: &mut AssemblySession) -> Result<()> {
        match activate_assembly(app, &session.locked_title) {
            Ok(Some(document)) => {
                session.document = document;
                Ok(())
            }
            Ok(None) => Err(AssemblyBuilderError::SessionLost {
                reason: format!("assembly '{}' is no longer open", session.locked_title),
            }),
            Err(e) if e.is_disconnect() => Err(AssemblyBuilderError::SessionLost {
                reason: e.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    fn create_assembly(&self, app: &dyn HostApp) -> Result<Box<dyn HostDocument>> {
        let template = match &self.settings.template {
            Some(template) => template.clone(),
            None => app.default_assembly_template().unwrap_or_else(|e| {
                debug!(error = %e, "no default assembly template");
                String::new()
            }),
        };

        let document = app
            .new_document(&template, DocumentKind::Assembly)?
            .ok_or_else(|| {
                AssemblyBuilderError::HostUnavailable("assembly document could not be created".into())
            })?;
        info!(%template, "created new assembly");
        Ok(document)
    }
}

/// Activate `title` and return it only if it is an assembly.
fn activate_assembly(app: &dyn HostApp, title: &str) -> Result<Option<Box<dyn HostDocument>>> {
    let Some(document) = app.activate_document(title)? else {
        return Ok(None);
    };
    match document.kind()? {
        DocumentKind::Assembly => Ok(Some(document)),
        DocumentKind::Part => Ok(None),
    }
}

/// Active document first, then every open document in host order.
fn find_open_assembly(app: &dyn HostApp) -> Result<Option<Box<dyn HostDocument>>> {
    if let Some(active) = app.active_document()? {
        if active.kind()? == DocumentKind::Assembly {
            return Ok(Some(active));
        }
    }

    for title in app.open_document_titles()? {
        if let Some(document) = activate_assembly(app, &title)? {
            return Ok(Some(document));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assemblybuilder_shared::AppConfig;

    use super::*;
    use crate::simulation::SimHost;

    fn settings() -> HostSettings {
        HostSettings::try_from(&AppConfig::default()).unwrap()
    }

    #[test]
    fn attaches_before_launching() {
        let host = SimHost::running(&settings());
        let settings = settings();
        let timings = Timings::immediate();
        let manager = HostSessionManager::new(&settings, &timings);

        let app = manager.acquire_app(&host).unwrap();
        assert!(manager.is_alive(app.as_ref()));
        assert_eq!(host.launch_count(), 0);
    }

    #[test]
    fn launches_when_nothing_is_running() {
        let host = SimHost::new(&settings());
        let settings = settings();
        let timings = Timings::immediate();
        let manager = HostSessionManager::new(&settings, &timings);

        manager.acquire_app(&host).unwrap();
        assert_eq!(host.launch_count(), 1);
    }

    #[test]
    fn launch_that_never_answers_is_host_unavailable() {
        let host = SimHost::new(&settings());
        host.launch_unresponsive(true);
        let mut settings = settings();
        settings.launch_timeout = Duration::ZERO;
        let timings = Timings::immediate();

        let err = HostSessionManager::new(&settings, &timings)
            .acquire_app(&host)
            .err().unwrap();
        assert!(matches!(err, AssemblyBuilderError::HostUnavailable(_)));
    }

    #[test]
    fn new_assembly_is_pinned_with_zero_offset() {
        let host = SimHost::running(&settings());
        host.add_open_assembly("Existing.SLDASM", &["a-1", "b-1"]);
        let settings = settings();
        let timings = Timings::immediate();
        let manager = HostSessionManager::new(&settings, &timings);
        let app = manager.acquire_app(&host).unwrap();

        let session = manager.acquire_assembly(app.as_ref(), &AssemblyTarget::New).unwrap();
        assert!(session.created);
        assert_eq!(session.placement_offset, 0.0);
        assert_eq!(session.locked_title, "Assem1");
        assert!(session.pre_existing_open_titles.contains("Existing.SLDASM"));
    }

    #[test]
    fn append_offsets_by_existing_component_count() {
        let host = SimHost::running(&settings());
        host.add_open_assembly("Frame.SLDASM", &["a-1", "b-1", "c-1"]);
        let settings = settings();
        let timings = Timings::immediate();
        let manager = HostSessionManager::new(&settings, &timings);
        let app = manager.acquire_app(&host).unwrap();

        let session = manager
            .acquire_assembly(app.as_ref(), &AssemblyTarget::ExistingOpen)
            .unwrap();
        assert!(!session.created);
        assert_eq!(session.locked_title, "Frame.SLDASM");
        assert_eq!(session.initial_component_count, 3);
        assert!((session.placement_offset - (-0.9)).abs() < 1e-9);
    }

    #[test]
    fn locked_target_re_pins_by_title_regardless_of_focus() {
        let host = SimHost::running(&settings());
        host.add_open_assembly("Frame.SLDASM", &["a-1", "b-1"]);
        host.add_open_assembly("Other.SLDASM", &[]);
        let settings = settings();
        let timings = Timings::immediate();
        let manager = HostSessionManager::new(&settings, &timings);
        let app = manager.acquire_app(&host).unwrap();

        let session = manager
            .acquire_assembly(app.as_ref(), &AssemblyTarget::Locked("Frame.SLDASM".into()))
            .unwrap();
        assert!(!session.created);
        assert_eq!(session.locked_title, "Frame.SLDASM");
        assert_eq!(session.initial_component_count, 2);
        assert!((session.placement_offset - (-0.6)).abs() < 1e-9);
    }

    #[test]
    fn locked_target_that_is_gone_is_host_unavailable() {
        let host = SimHost::running(&settings());
        host.add_open_assembly("Other.SLDASM", &[]);
        let settings = settings();
        let timings = Timings::immediate();
        let manager = HostSessionManager::new(&settings, &timings);
        let app = manager.acquire_app(&host).unwrap();

        let err = manager
            .acquire_assembly(app.as_ref(), &AssemblyTarget::Locked("Frame.SLDASM".into()))
            .unwrap_err();
        assert!(matches!(err, AssemblyBuilderError::HostUnavailable(_)));
    }

    #[test]
    fn append_without_open_assembly_creates_one() {
        let host = SimHost::running(&settings());
        let settings = settings();
        let timings = Timings::immediate();
        let manager = HostSessionManager::new(&settings, &timings);
        let app = manager.acquire_app(&host).unwrap();

        let session = manager
            .acquire_assembly(app.as_ref(), &AssemblyTarget::ExistingOpen)
            .unwrap();
        assert!(session.created);
        assert_eq!(session.placement_offset, 0.0);
    }

    #[test]
    fn refused_assembly_creation_is_fatal() {
        let host = SimHost::running(&settings());
        host.refuse_new_documents(true);
        let settings = settings();
        let timings = Timings::immediate();
        let manager = HostSessionManager::new(&settings, &timings);
        let app = manager.acquire_app(&host).unwrap();

        let err = manager
            .acquire_assembly(app.as_ref(), &AssemblyTarget::New)
            .unwrap_err();
        assert!(matches!(err, AssemblyBuilderError::HostUnavailable(_)));
    }

    #[test]
    fn refresh_reactivates_pinned_title() {
        let host = SimHost::running(&settings());
        let settings = settings();
        let timings = Timings::immediate();
        let manager = HostSessionManager::new(&settings, &timings);
        let app = manager.acquire_app(&host).unwrap();
        let mut session = manager.acquire_assembly(app.as_ref(), &AssemblyTarget::New).unwrap();

        host.add_open_assembly("Other.SLDASM", &[]);
        assert_eq!(host.active_title().as_deref(), Some("Other.SLDASM"));

        manager.refresh(app.as_ref(), &mut session).unwrap();
        assert_eq!(host.active_title().as_deref(), Some("Assem1"));

        host.crash();
        let err = manager.refresh(app.as_ref(), &mut session).unwrap_err();
        assert!(err.is_disconnect());
    }
}
