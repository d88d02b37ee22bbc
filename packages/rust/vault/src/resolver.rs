//! Part code → vault file resolution.
//!
//! Searches the configured data-card attributes in priority order, then falls
//! back to a wildcard file-name search. Every search hit is verified by
//! re-reading the object from the vault before it is accepted.

use std::path::Path;

use tracing::{debug, instrument, warn};

use assemblybuilder_shared::{FileKind, PartCode, ResolvedFile, Result, VaultSettings};

use crate::client::{SearchHit, VaultSession};
use crate::paths::map_vault_path;

/// How a resolution was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchSource {
    /// Exact match on the named data-card attribute.
    Attribute(String),
    /// Wildcard file-name fallback.
    FileName,
}

/// A verified resolution of one part code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub file: ResolvedFile,
    /// File name of the matched object.
    pub name: String,
    pub matched_by: MatchSource,
}

/// Maps part codes to vault files.
pub struct VaultResolver<'a> {
    settings: &'a VaultSettings,
}

impl<'a> VaultResolver<'a> {
    pub fn new(settings: &'a VaultSettings) -> Self {
        Self { settings }
    }

    /// Resolve `code` to a verified vault file; `Ok(None)` when nothing matches.
    ///
    /// The first verified hit wins. A failing vault call is returned as an
    /// error rather than read as "no match", so a dropped session never turns
    /// a real part into a missing one.
    #[instrument(skip_all, fields(code = %code))]
    pub fn resolve(&self, vault: &dyn VaultSession, code: &PartCode) -> Result<Option<Resolution>> {
        let value = code.as_str().trim();

        for attribute in &self.settings.attributes {
            let hits = vault.search_by_attribute(attribute, value).inspect_err(|e| {
                warn!(%attribute, error = %e, "attribute search failed");
            })?;
            let source = MatchSource::Attribute(attribute.clone());
            if let Some(resolution) = self.first_verified(vault, code, &hits, source)? {
                return Ok(Some(resolution));
            }
        }

        let pattern = format!("%{value}%");
        let hits = vault.search_by_filename(&pattern).inspect_err(|e| {
            warn!(%pattern, error = %e, "file name search failed");
        })?;
        self.first_verified(vault, code, &hits, MatchSource::FileName)
    }

    fn first_verified(
        &self,
        vault: &dyn VaultSession,
        code: &PartCode,
        hits: &[SearchHit],
        source: MatchSource,
    ) -> Result<Option<Resolution>> {
        for hit in hits {
            let Some(name) = self.verify(vault, hit, code)? else {
                continue;
            };
            let Some(kind) = FileKind::from_path(Path::new(&name)) else {
                continue;
            };
            let root = vault.root_folder();
            let local_path = map_vault_path(
                root.as_deref(),
                &hit.path,
                self.settings.local_root.as_deref(),
            );
            debug!(name = %name, source = ?source, "verified vault match");
            return Ok(Some(Resolution {
                file: ResolvedFile {
                    source_code: code.clone(),
                    vault_path: hit.path.clone(),
                    local_path,
                    kind,
                },
                name,
                matched_by: source,
            }));
        }
        Ok(None)
    }

    /// Re-read the object behind a hit; returns its name when it really matches.
    fn verify(
        &self,
        vault: &dyn VaultSession,
        hit: &SearchHit,
        code: &PartCode,
    ) -> Result<Option<String>> {
        let Some(name) = vault.object_name(hit.id)? else {
            debug!(id = hit.id, "search hit no longer exists");
            return Ok(None);
        };

        if !self.has_accepted_extension(&name) {
            return Ok(None);
        }

        let target = code.as_str().trim();
        for attribute in &self.settings.attributes {
            if let Some(value) = vault.attribute_value(hit.id, attribute)? {
                if value.trim() == target {
                    return Ok(Some(name));
                }
            }
        }
        Ok(None)
    }

    fn has_accepted_extension(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.settings
            .extensions
            .iter()
            .any(|ext| lower.ends_with(ext.as_str()))
    }
}
