//! Final pass over a completed assembly.

use tracing::{debug, info, instrument};

use crate::client::HostDocument;

/// What the finalizer managed to do. Every step is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeReport {
    pub components: usize,
    pub unfixed: usize,
    pub flexible: usize,
    /// Components on which at least one step failed.
    pub failed: Vec<String>,
    pub view_set: bool,
}

/// Releases fixed constraints, marks components flexible, and sets the view.
#[derive(Debug, Default)]
pub struct Finalizer;

impl Finalizer {
    #[instrument(skip_all)]
    pub fn run(&self, document: &dyn HostDocument) -> FinalizeReport {
        let mut report = FinalizeReport::default();

        let components = match document.components() {
            Ok(components) => components,
            Err(e) => {
                debug!(error = %e, "could not enumerate components");
                Vec::new()
            }
        };
        report.components = components.len();

        for component in &components {
            let mut ok = true;
            match document.unfix_component(component) {
                Ok(()) => report.unfixed += 1,
                Err(e) => {
                    debug!(component = %component.name, error = %e, "unfix failed");
                    ok = false;
                }
            }
            match document.set_flexible(component) {
                Ok(()) => report.flexible += 1,
                Err(e) => {
                    debug!(component = %component.name, error = %e, "set flexible failed");
                    ok = false;
                }
            }
            if !ok {
                report.failed.push(component.name.clone());
            }
        }

        let isometric = document.show_isometric_view();
        let fit = document.zoom_to_fit();
        report.view_set = isometric.is_ok() && fit.is_ok();

        info!(
            components = report.components,
            unfixed = report.unfixed,
            flexible = report.flexible,
            "assembly finalized"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use assemblybuilder_shared::{AppConfig, FileKind, HostSettings, Timings};

    use super::*;
    use crate::inserter::ComponentInserter;
    use crate::session::{AssemblyTarget, HostSessionManager};
    use crate::simulation::SimHost;

    #[test]
    fn one_failing_component_does_not_stop_the_pass() {
        let settings = HostSettings::try_from(&AppConfig::default()).unwrap();
        let timings = Timings::immediate();
        let host = SimHost::running(&settings);
        let manager = HostSessionManager::new(&settings, &timings);
        let app = manager.acquire_app(&host).unwrap();
        let mut session = manager.acquire_assembly(app.as_ref(), &AssemblyTarget::New).unwrap();
        let inserter = ComponentInserter::new(&settings, &timings);
        for name in ["a", "b", "c"] {
            let path = format!("/vault/parts/{name}.sldprt");
            inserter.insert(app.as_ref(), &mut session, Path::new(&path), FileKind::Part);
        }
        host.fail_finalize_for("b-1");

        let report = Finalizer.run(session.document.as_ref());

        assert_eq!(report.components, 3);
        assert_eq!(report.unfixed, 2);
        assert_eq!(report.flexible, 2);
        assert_eq!(report.failed, vec!["b-1".to_string()]);
        assert!(report.view_set);
        assert_eq!(host.flexible_components(), vec!["a-1".to_string(), "c-1".to_string()]);
    }
}
