//! In-memory vault used by tests and by the CLI's catalog mode.
//!
//! The vault root doubles as the local cache directory: a fetch writes the
//! file's bytes to its vault path on disk and records the local version.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use assemblybuilder_shared::{AssemblyBuilderError, Result};

use crate::client::{FileId, SearchHit, VaultConnector, VaultFileHandle, VaultSession};

/// A file stored in the simulated vault.
#[derive(Debug, Clone)]
pub struct SimFile {
    /// Full path under the vault root.
    pub path: PathBuf,
    /// Data-card attributes as `(name, value)` pairs.
    pub attributes: Vec<(String, String)>,
    pub latest_version: u32,
    /// Paths of files this one references (fetched along with it in a batch get).
    pub references: Vec<PathBuf>,
}

impl SimFile {
    pub fn new(path: impl Into<PathBuf>, latest_version: u32) -> Self {
        Self {
            path: path.into(),
            attributes: Vec::new(),
            latest_version,
            references: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_reference(mut self, path: impl Into<PathBuf>) -> Self {
        self.references.push(path.into());
        self
    }

    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug)]
struct StoredFile {
    file: SimFile,
    local_version: Option<u32>,
}

#[derive(Debug, Default)]
struct SimVaultState {
    root: PathBuf,
    files: Vec<StoredFile>,
    /// Search index entries that point at objects whose data card disagrees.
    stale_index: Vec<(String, String, FileId)>,
    failing_logins: u32,
    login_attempts: u32,
    stall_fetches: bool,
    outdated_fetches: bool,
    /// Call budget handed to the next session that logs in.
    next_session_lifetime: Option<u32>,
    fetched: Vec<PathBuf>,
}

impl SimVaultState {
    fn stored(&self, id: FileId) -> Option<&StoredFile> {
        id.checked_sub(1).and_then(|i| self.files.get(i as usize))
    }

    fn id_of(&self, path: &Path) -> Option<FileId> {
        self.files
            .iter()
            .position(|f| f.file.path == path)
            .map(|i| i as FileId + 1)
    }

    fn hit(&self, id: FileId) -> Option<SearchHit> {
        self.stored(id).map(|s| SearchHit {
            id,
            name: s.file.name(),
            path: s.file.path.clone(),
        })
    }

    fn materialize(&mut self, id: FileId) -> Result<()> {
        let stored = id
            .checked_sub(1)
            .and_then(|i| self.files.get_mut(i as usize))
            .ok_or_else(|| AssemblyBuilderError::Vault(format!("unknown object {id}")))?;
        self.fetched.push(stored.file.path.clone());
        if self.stall_fetches {
            return Ok(());
        }
        let path = stored.file.path.clone();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AssemblyBuilderError::io(parent, e))?;
        }
        let body = format!("{} v{}\n", stored.file.name(), stored.file.latest_version);
        std::fs::write(&path, body).map_err(|e| AssemblyBuilderError::io(&path, e))?;
        stored.local_version = if self.outdated_fetches {
            Some(stored.file.latest_version.saturating_sub(1))
        } else {
            Some(stored.file.latest_version)
        };
        Ok(())
    }
}

/// Handle to a simulated vault. Cloning shares the same state.
#[derive(Debug, Clone, Default)]
pub struct SimVault {
    state: Arc<Mutex<SimVaultState>>,
}

impl SimVault {
    /// Create an empty vault rooted at `root` (also the local cache directory).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let vault = Self::default();
        vault.state().root = root.into();
        vault
    }

    fn state(&self) -> MutexGuard<'_, SimVaultState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a file; relative paths are placed under the vault root.
    pub fn add_file(&self, mut file: SimFile) -> FileId {
        let mut state = self.state();
        if file.path.is_relative() {
            file.path = state.root.join(&file.path);
        }
        let root = state.root.clone();
        for reference in &mut file.references {
            if reference.is_relative() {
                *reference = root.join(&*reference);
            }
        }
        state.files.push(StoredFile {
            file,
            local_version: None,
        });
        state.files.len() as FileId
    }

    /// Make `attribute = value` searches also return `id`, without the data card agreeing.
    pub fn add_stale_index_entry(&self, attribute: &str, value: &str, id: FileId) {
        self.state()
            .stale_index
            .push((attribute.to_string(), value.to_string(), id));
    }

    /// Check in a new revision of the file at `path`.
    pub fn bump_version(&self, path: &Path) {
        let mut state = self.state();
        if let Some(id) = state.id_of(path) {
            state.files[(id - 1) as usize].file.latest_version += 1;
        }
    }

    /// Reject the next `n` login attempts.
    pub fn fail_logins(&self, n: u32) {
        self.state().failing_logins = n;
    }

    /// Accept fetch requests but never deliver the file.
    pub fn stall_fetches(&self, stall: bool) {
        self.state().stall_fetches = stall;
    }

    /// Deliver fetched files one revision behind the latest.
    pub fn serve_outdated_fetches(&self, outdated: bool) {
        self.state().outdated_fetches = outdated;
    }

    /// The next session to log in dies after `calls` vault calls; every call
    /// after that fails and `is_alive` turns false. Later sessions are healthy.
    pub fn drop_next_session_after(&self, calls: u32) {
        self.state().next_session_lifetime = Some(calls);
    }

    pub fn login_attempts(&self) -> u32 {
        self.state().login_attempts
    }

    /// Number of individual file transfers requested so far.
    pub fn fetch_count(&self) -> usize {
        self.state().fetched.len()
    }

    pub fn fetched_paths(&self) -> Vec<PathBuf> {
        self.state().fetched.clone()
    }

    pub fn root(&self) -> PathBuf {
        self.state().root.clone()
    }
}

impl VaultConnector for SimVault {
    fn login(&self, vault_name: &str) -> Result<Box<dyn VaultSession>> {
        let mut state = self.state();
        state.login_attempts += 1;
        if state.failing_logins > 0 {
            state.failing_logins -= 1;
            return Err(AssemblyBuilderError::VaultUnavailable(format!(
                "archive server for '{vault_name}' not reachable"
            )));
        }
        Ok(Box::new(SimVaultSession {
            vault: self.clone(),
            lifetime: state.next_session_lifetime.take(),
            calls: Cell::new(0),
        }))
    }
}

struct SimVaultSession {
    vault: SimVault,
    lifetime: Option<u32>,
    calls: Cell<u32>,
}

impl SimVaultSession {
    fn touch(&self) -> Result<()> {
        let calls = self.calls.get() + 1;
        self.calls.set(calls);
        match self.lifetime {
            Some(lifetime) if calls > lifetime => Err(AssemblyBuilderError::VaultUnavailable(
                "vault session expired".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl VaultSession for SimVaultSession {
    fn search_by_attribute(&self, attribute: &str, value: &str) -> Result<Vec<SearchHit>> {
        self.touch()?;
        let state = self.vault.state();
        let mut ids: Vec<FileId> = state
            .files
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                s.file
                    .attributes
                    .iter()
                    .any(|(name, v)| name == attribute && v == value)
            })
            .map(|(i, _)| i as FileId + 1)
            .collect();
        for (attr, v, id) in &state.stale_index {
            if attr == attribute && v == value && !ids.contains(id) {
                ids.insert(0, *id);
            }
        }
        Ok(ids.into_iter().filter_map(|id| state.hit(id)).collect())
    }

    fn search_by_filename(&self, pattern: &str) -> Result<Vec<SearchHit>> {
        self.touch()?;
        let state = self.vault.state();
        Ok(state
            .files
            .iter()
            .enumerate()
            .filter(|(_, s)| like_match(pattern, &s.file.name()))
            .filter_map(|(i, _)| state.hit(i as FileId + 1))
            .collect())
    }

    fn object_name(&self, id: FileId) -> Result<Option<String>> {
        self.touch()?;
        Ok(self.vault.state().stored(id).map(|s| s.file.name()))
    }

    fn attribute_value(&self, id: FileId, attribute: &str) -> Result<Option<String>> {
        self.touch()?;
        Ok(self.vault.state().stored(id).and_then(|s| {
            s.file
                .attributes
                .iter()
                .find(|(name, _)| name == attribute)
                .map(|(_, v)| v.clone())
        }))
    }

    fn root_folder(&self) -> Option<PathBuf> {
        Some(self.vault.root())
    }

    fn file_handle(&self, path: &Path) -> Result<VaultFileHandle> {
        self.touch()?;
        let state = self.vault.state();
        let id = state.id_of(path).ok_or_else(|| {
            AssemblyBuilderError::Vault(format!("no vault object at {}", path.display()))
        })?;
        let stored = &state.files[(id - 1) as usize];
        let local_version = stored.local_version.filter(|_| path.exists());
        Ok(VaultFileHandle {
            file_id: id,
            folder_id: id,
            local_version,
            latest_version: Some(stored.file.latest_version),
        })
    }

    fn fetch_latest(&self, handle: &VaultFileHandle) -> Result<()> {
        self.touch()?;
        self.vault.state().materialize(handle.file_id)
    }

    fn fetch_latest_with_references(&self, handle: &VaultFileHandle) -> Result<()> {
        self.touch()?;
        let mut state = self.vault.state();
        let mut pending = vec![handle.file_id];
        let mut seen = Vec::new();
        while let Some(id) = pending.pop() {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            state.materialize(id)?;
            let references = state
                .stored(id)
                .map(|s| s.file.references.clone())
                .unwrap_or_default();
            pending.extend(references.iter().filter_map(|p| state.id_of(p)));
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.lifetime.is_none_or(|lifetime| self.calls.get() < lifetime)
    }
}

/// Case-insensitive match where `%` stands for any run of characters.
fn like_match(pattern: &str, name: &str) -> bool {
    let name = name.to_lowercase();
    let pattern = pattern.to_lowercase();
    let parts: Vec<&str> = pattern.split('%').collect();
    let mut rest = name.as_str();

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }

    parts.last().is_some_and(|last| last.is_empty()) || rest.is_empty()
}
