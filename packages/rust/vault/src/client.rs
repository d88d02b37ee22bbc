//! Vault collaborator interface.
//!
//! A vault is a document-management backend storing versioned CAD files with
//! searchable data-card attributes. Concrete bindings live outside this
//! repository; [`crate::simulation`] provides an in-memory implementation.

use std::path::{Path, PathBuf};

use assemblybuilder_shared::Result;

/// Vault-internal object identifier.
pub type FileId = u64;

/// Vault-internal folder identifier.
pub type FolderId = u64;

/// One hit from a vault search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub id: FileId,
    /// File name as reported by the search index.
    pub name: String,
    /// Full path under the vault's root folder.
    pub path: PathBuf,
}

/// Ephemeral pairing of a vault file object and its containing folder.
///
/// Requested fresh for every freshness check; never cached or persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultFileHandle {
    pub file_id: FileId,
    pub folder_id: FolderId,
    /// Version present in the local cache, if the vault knows it.
    pub local_version: Option<u32>,
    /// Latest version checked in to the vault, if the vault reports it.
    pub latest_version: Option<u32>,
}

impl VaultFileHandle {
    /// Whether the vault reports the local copy as at least the latest version.
    pub fn is_current(&self) -> bool {
        matches!(
            (self.local_version, self.latest_version),
            (Some(local), Some(latest)) if local >= latest
        )
    }

    /// Whether both versions are known and the local one is older.
    pub fn is_behind(&self) -> bool {
        matches!(
            (self.local_version, self.latest_version),
            (Some(local), Some(latest)) if local < latest
        )
    }
}

/// Establishes logged-in vault sessions.
///
/// Connectors cross thread boundaries; sessions stay on the worker thread.
pub trait VaultConnector: Send + Sync {
    /// Log in to the named vault. Failures are reported as
    /// [`AssemblyBuilderError::VaultUnavailable`](assemblybuilder_shared::AssemblyBuilderError::VaultUnavailable).
    fn login(&self, vault_name: &str) -> Result<Box<dyn VaultSession>>;
}

/// A logged-in vault session.
pub trait VaultSession {
    /// Exact-value search on a named data-card attribute.
    fn search_by_attribute(&self, attribute: &str, value: &str) -> Result<Vec<SearchHit>>;

    /// Wildcard file-name search (`%` matches any run of characters).
    fn search_by_filename(&self, pattern: &str) -> Result<Vec<SearchHit>>;

    /// Re-read an object's file name directly from the vault.
    fn object_name(&self, id: FileId) -> Result<Option<String>>;

    /// Re-read an attribute value from an object's data card.
    fn attribute_value(&self, id: FileId, attribute: &str) -> Result<Option<String>>;

    /// The vault's own root folder, used to re-root search paths.
    fn root_folder(&self) -> Option<PathBuf>;

    /// Look up the file object and folder for a local path.
    fn file_handle(&self, path: &Path) -> Result<VaultFileHandle>;

    /// Copy the latest revision of a single file into the local cache.
    fn fetch_latest(&self, handle: &VaultFileHandle) -> Result<()>;

    /// Fetch the latest revision together with its full reference tree.
    fn fetch_latest_with_references(&self, handle: &VaultFileHandle) -> Result<()>;

    /// Cheap liveness check of the session.
    fn is_alive(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(local: Option<u32>, latest: Option<u32>) -> VaultFileHandle {
        VaultFileHandle {
            file_id: 1,
            folder_id: 1,
            local_version: local,
            latest_version: latest,
        }
    }

    #[test]
    fn currency_requires_both_versions() {
        assert!(handle(Some(3), Some(3)).is_current());
        assert!(handle(Some(4), Some(3)).is_current());
        assert!(!handle(Some(2), Some(3)).is_current());
        assert!(!handle(None, Some(3)).is_current());
        assert!(!handle(Some(3), None).is_current());
    }

    #[test]
    fn behind_only_when_both_versions_known() {
        assert!(handle(Some(2), Some(3)).is_behind());
        assert!(!handle(Some(3), Some(3)).is_behind());
        assert!(!handle(None, Some(3)).is_behind());
        assert!(!handle(Some(1), None).is_behind());
    }
}
