//! Re-rooting of vault search paths into the operator's local vault view.

use std::path::{Path, PathBuf};

/// Map a path reported by the vault into the configured local vault view.
///
/// Paths outside the vault root, or calls without a configured local root,
/// come back unchanged.
pub fn map_vault_path(
    vault_root: Option<&Path>,
    vault_path: &Path,
    local_root: Option<&Path>,
) -> PathBuf {
    let (Some(root), Some(local)) = (vault_root, local_root) else {
        return vault_path.to_path_buf();
    };

    match vault_path.strip_prefix(root) {
        Ok(relative) => local.join(relative),
        Err(_) => vault_path.to_path_buf(),
    }
}
