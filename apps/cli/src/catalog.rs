//! TOML catalog describing a simulated vault, host, and BOM table.
//!
//! ```toml
//! [vault]
//! root = "vault"            # relative to the catalog file
//!
//! [[files]]
//! path = "parts/2001234.sldprt"
//! version = 2
//! attributes = { "SAP No" = "2001234" }
//!
//! [[open_assemblies]]
//! title = "Frame.SLDASM"
//! components = ["base-1"]
//!
//! [boms.9000001]
//! header = { material = "9000001", description = "Frame kit" }
//! lines = [{ code = "2001234", quantity = "2" }]
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use assemblybuilder_core::{Bom, RunServices, StaticBomSource};
use assemblybuilder_host::SimHost;
use assemblybuilder_shared::{AssemblyBuilderError, HostSettings, Result};
use assemblybuilder_vault::{SimFile, SimVault};

#[derive(Debug, Deserialize)]
pub(crate) struct Catalog {
    pub vault: CatalogVault,
    #[serde(default)]
    pub files: Vec<CatalogFile>,
    #[serde(default)]
    pub open_assemblies: Vec<CatalogAssembly>,
    #[serde(default)]
    pub boms: HashMap<String, Bom>,
    #[serde(default)]
    pub faults: CatalogFaults,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CatalogVault {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CatalogFile {
    pub path: PathBuf,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub references: Vec<PathBuf>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub(crate) struct CatalogAssembly {
    pub title: String,
    #[serde(default)]
    pub components: Vec<String>,
}

/// Fault injection for rehearsing failure handling.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CatalogFaults {
    #[serde(default)]
    pub fail_logins: u32,
    /// The first vault session dies after this many calls.
    pub drop_vault_session_after: Option<u32>,
    pub crash_after_inserts: Option<usize>,
    pub disconnect_on_insert: Option<usize>,
}

impl Catalog {
    /// Read a catalog file; a relative vault root is taken relative to the file.
    pub fn load(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).map_err(|e| AssemblyBuilderError::io(path, e))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, base)
    }

    pub fn parse(text: &str, base: &Path) -> Result<Self> {
        let mut catalog: Catalog = toml::from_str(text)
            .map_err(|e| AssemblyBuilderError::validation(format!("invalid catalog: {e}")))?;
        if catalog.vault.root.is_relative() {
            catalog.vault.root = base.join(&catalog.vault.root);
        }
        for file in &catalog.files {
            if file.attributes.is_empty() {
                return Err(AssemblyBuilderError::validation(format!(
                    "catalog file {} has no attributes",
                    file.path.display()
                )));
            }
        }
        Ok(catalog)
    }

    /// Build the simulated collaborators.
    pub fn into_services(self, host_settings: &HostSettings) -> RunServices {
        let vault = SimVault::new(&self.vault.root);
        for file in self.files {
            let mut sim = SimFile::new(file.path, file.version);
            for (name, value) in file.attributes {
                sim = sim.with_attribute(name, value);
            }
            for reference in file.references {
                sim = sim.with_reference(reference);
            }
            vault.add_file(sim);
        }
        if self.faults.fail_logins > 0 {
            vault.fail_logins(self.faults.fail_logins);
        }
        if let Some(calls) = self.faults.drop_vault_session_after {
            vault.drop_next_session_after(calls);
        }

        let host = if self.open_assemblies.is_empty() {
            SimHost::new(host_settings)
        } else {
            SimHost::running(host_settings)
        };
        for assembly in &self.open_assemblies {
            let names: Vec<&str> = assembly.components.iter().map(String::as_str).collect();
            host.add_open_assembly(&assembly.title, &names);
        }
        if let Some(n) = self.faults.crash_after_inserts {
            host.crash_after_inserts(n);
        }
        if let Some(k) = self.faults.disconnect_on_insert {
            host.disconnect_on_insert(k);
        }

        let boms = StaticBomSource::new(self.boms);
        RunServices::new(Arc::new(vault), Arc::new(host)).with_bom(Arc::new(boms))
    }
}
