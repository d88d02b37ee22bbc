//! Guarantees that a resolved file is present locally at the latest revision.

use std::path::Path;
use std::thread;

use tracing::{debug, info, instrument, warn};

use assemblybuilder_shared::{AssemblyBuilderError, FileKind, Result, Timings};

use crate::client::{VaultFileHandle, VaultSession};

/// What [`FreshnessReconciler::ensure_local`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The local copy was already at the latest revision; nothing was transferred.
    AlreadyCurrent,
    /// A fetch was issued and the file arrived.
    Fetched,
}

/// Brings local copies up to date with the vault.
pub struct FreshnessReconciler<'a> {
    timings: &'a Timings,
}

impl<'a> FreshnessReconciler<'a> {
    pub fn new(timings: &'a Timings) -> Self {
        Self { timings }
    }

    /// Make sure `path` exists locally at the vault's latest revision.
    ///
    /// Safe to call redundantly: an already-current file costs one metadata
    /// read and no transfer. Sub-assemblies are fetched together with their
    /// reference tree.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn ensure_local(
        &self,
        vault: &dyn VaultSession,
        path: &Path,
        kind: FileKind,
    ) -> Result<Freshness> {
        let handle = vault.file_handle(path)?;

        if path.exists() && handle.is_current() {
            debug!("local copy is current");
            return Ok(Freshness::AlreadyCurrent);
        }

        info!(
            local = ?handle.local_version,
            latest = ?handle.latest_version,
            "fetching latest revision"
        );
        self.fetch(vault, &handle, kind)?;
        self.wait_for_arrival(path)?;

        let landed = vault.file_handle(path)?;
        if landed.is_behind() {
            warn!(
                local = ?landed.local_version,
                latest = ?landed.latest_version,
                "fetched copy is still behind the vault"
            );
            return Err(AssemblyBuilderError::StaleLocalCopy {
                path: path.to_path_buf(),
            });
        }
        Ok(Freshness::Fetched)
    }

    fn fetch(&self, vault: &dyn VaultSession, handle: &VaultFileHandle, kind: FileKind) -> Result<()> {
        match kind {
            FileKind::SubAssembly => vault.fetch_latest_with_references(handle),
            FileKind::Part => vault.fetch_latest(handle),
        }
    }

    /// Poll for a non-empty file, bounded by `fetch_poll_attempts`.
    fn wait_for_arrival(&self, path: &Path) -> Result<()> {
        for attempt in 0..self.timings.fetch_poll_attempts.max(1) {
            if is_non_empty(path) {
                debug!(attempt, "file arrived");
                return Ok(());
            }
            thread::sleep(self.timings.fetch_poll);
        }

        if is_non_empty(path) {
            return Ok(());
        }
        Err(AssemblyBuilderError::FetchTimeout {
            path: path.to_path_buf(),
        })
    }
}

fn is_non_empty(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use uuid::Uuid;

    use super::*;
    use crate::client::VaultConnector;
    use crate::simulation::{SimFile, SimVault};

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("assemblybuilder-vault-{}", Uuid::now_v7()))
    }

    #[test]
    fn second_call_on_current_file_fetches_nothing() {
        let root = temp_root();
        let vault = SimVault::new(&root);
        vault.add_file(SimFile::new("parts/p.sldprt", 2));
        let session = vault.login("TEST").unwrap();
        let timings = Timings::immediate();
        let reconciler = FreshnessReconciler::new(&timings);
        let path = root.join("parts/p.sldprt");

        let first = reconciler.ensure_local(session.as_ref(), &path, FileKind::Part).unwrap();
        assert_eq!(first, Freshness::Fetched);
        assert_eq!(vault.fetch_count(), 1);

        let second = reconciler.ensure_local(session.as_ref(), &path, FileKind::Part).unwrap();
        assert_eq!(second, Freshness::AlreadyCurrent);
        assert_eq!(vault.fetch_count(), 1);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn stale_copy_is_refetched() {
        let root = temp_root();
        let vault = SimVault::new(&root);
        vault.add_file(SimFile::new("parts/p.sldprt", 1));
        let session = vault.login("TEST").unwrap();
        let timings = Timings::immediate();
        let reconciler = FreshnessReconciler::new(&timings);
        let path = root.join("parts/p.sldprt");

        reconciler.ensure_local(session.as_ref(), &path, FileKind::Part).unwrap();
        vault.bump_version(&path);

        let outcome = reconciler.ensure_local(session.as_ref(), &path, FileKind::Part).unwrap();
        assert_eq!(outcome, Freshness::Fetched);
        assert_eq!(vault.fetch_count(), 2);
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("v2"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn deleted_local_copy_is_refetched() {
        let root = temp_root();
        let vault = SimVault::new(&root);
        vault.add_file(SimFile::new("parts/p.sldprt", 1));
        let session = vault.login("TEST").unwrap();
        let timings = Timings::immediate();
        let reconciler = FreshnessReconciler::new(&timings);
        let path = root.join("parts/p.sldprt");

        reconciler.ensure_local(session.as_ref(), &path, FileKind::Part).unwrap();
        std::fs::remove_file(&path).unwrap();

        let outcome = reconciler.ensure_local(session.as_ref(), &path, FileKind::Part).unwrap();
        assert_eq!(outcome, Freshness::Fetched);
        assert!(path.exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn fetch_that_never_lands_times_out() {
        let root = temp_root();
        let vault = SimVault::new(&root);
        vault.add_file(SimFile::new("parts/p.sldprt", 1));
        vault.stall_fetches(true);
        let session = vault.login("TEST").unwrap();
        let timings = Timings::immediate();
        let path = root.join("parts/p.sldprt");

        let err = FreshnessReconciler::new(&timings)
            .ensure_local(session.as_ref(), &path, FileKind::Part)
            .unwrap_err();
        assert!(matches!(err, AssemblyBuilderError::FetchTimeout { .. }));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn fetch_that_lands_behind_is_stale() {
        let root = temp_root();
        let vault = SimVault::new(&root);
        vault.add_file(SimFile::new("parts/p.sldprt", 3));
        vault.serve_outdated_fetches(true);
        let session = vault.login("TEST").unwrap();
        let timings = Timings::immediate();
        let path = root.join("parts/p.sldprt");

        let err = FreshnessReconciler::new(&timings)
            .ensure_local(session.as_ref(), &path, FileKind::Part)
            .unwrap_err();
        assert!(matches!(err, AssemblyBuilderError::StaleLocalCopy { .. }));
        assert!(path.exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn sub_assembly_brings_its_references() {
        let root = temp_root();
        let vault = SimVault::new(&root);
        vault.add_file(SimFile::new("parts/a.sldprt", 1));
        vault.add_file(SimFile::new("parts/b.sldprt", 3));
        vault.add_file(
            SimFile::new("asm/frame.sldasm", 1)
                .with_reference("parts/a.sldprt")
                .with_reference("parts/b.sldprt"),
        );
        let session = vault.login("TEST").unwrap();
        let timings = Timings::immediate();
        let path = root.join("asm/frame.sldasm");

        FreshnessReconciler::new(&timings)
            .ensure_local(session.as_ref(), &path, FileKind::SubAssembly)
            .unwrap();
        assert_eq!(vault.fetch_count(), 3);
        assert!(root.join("parts/a.sldprt").exists());
        assert!(root.join("parts/b.sldprt").exists());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn unknown_path_is_a_vault_error() {
        let root = temp_root();
        let vault = SimVault::new(&root);
        let session = vault.login("TEST").unwrap();
        let timings = Timings::immediate();

        let err = FreshnessReconciler::new(&timings)
            .ensure_local(session.as_ref(), &root.join("nope.sldprt"), FileKind::Part)
            .unwrap_err();
        assert!(matches!(err, AssemblyBuilderError::Vault(_)));
    }
}
