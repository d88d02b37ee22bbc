//! Path spellings handed to the host's insertion entry points.
//!
//! The host's APIs disagree on long and non-ASCII paths, so every entry point
//! is tried with a long-path-safe form, the OS short form, and the original.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Paths at or above this length get the extended-length prefix.
const LONG_PATH_THRESHOLD: usize = 240;

const VERBATIM_PREFIX: &str = r"\\?\";
const VERBATIM_UNC_PREFIX: &str = r"\\?\UNC\";

/// Distinct spellings of one file path, plus their normalized forms.
#[derive(Debug, Clone)]
pub struct PathVariants {
    candidates: Vec<PathBuf>,
    compare: HashSet<String>,
}

impl PathVariants {
    /// Build the variants in trial order: long-path-safe, short, original.
    pub fn build(path: &Path, short: Option<PathBuf>) -> Self {
        let mut candidates: Vec<PathBuf> = Vec::with_capacity(3);
        for candidate in [Some(long_path_safe(path)), short, Some(path.to_path_buf())]
            .into_iter()
            .flatten()
        {
            if !candidate.as_os_str().is_empty() && !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
        let compare = candidates.iter().map(|p| normalize_for_compare(p)).collect();
        Self { candidates, compare }
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Whether `path` names the same file as one of the variants.
    pub fn matches(&self, path: &Path) -> bool {
        self.compare.contains(&normalize_for_compare(path))
    }
}

/// Absolute form of `path`, with the extended-length prefix when it is long.
pub fn long_path_safe(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    if raw.starts_with(VERBATIM_PREFIX) {
        return path.to_path_buf();
    }

    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let norm = absolute.to_string_lossy();
    if norm.chars().count() < LONG_PATH_THRESHOLD {
        return absolute;
    }

    match norm.strip_prefix(r"\\") {
        Some(unc) => PathBuf::from(format!("{VERBATIM_UNC_PREFIX}{unc}")),
        None => PathBuf::from(format!("{VERBATIM_PREFIX}{norm}")),
    }
}

/// Case- and separator-insensitive key for comparing host-reported paths.
pub fn normalize_for_compare(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let stripped = if let Some(unc) = raw.strip_prefix(VERBATIM_UNC_PREFIX) {
        format!(r"\\{unc}")
    } else if let Some(local) = raw.strip_prefix(VERBATIM_PREFIX) {
        local.to_string()
    } else {
        raw.into_owned()
    };

    let mut key = stripped.replace('\\', "/").to_lowercase();
    while key.len() > 1 && key.ends_with('/') {
        key.pop();
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_paths_stay_unprefixed() {
        let path = Path::new("/vault/parts/bracket.sldprt");
        assert_eq!(long_path_safe(path), PathBuf::from("/vault/parts/bracket.sldprt"));
    }

    #[test]
    fn long_paths_get_verbatim_prefix() {
        let long = format!("/vault/{}/bracket.sldprt", "d".repeat(250));
        let safe = long_path_safe(Path::new(&long));
        assert!(safe.to_string_lossy().starts_with(VERBATIM_PREFIX));

        let already = PathBuf::from(format!(r"\\?\C:\{}", "d".repeat(250)));
        assert_eq!(long_path_safe(&already), already);
    }

    #[test]
    fn variants_are_deduplicated_in_order() {
        let path = Path::new("/vault/parts/bracket.sldprt");
        let variants = PathVariants::build(path, Some(PathBuf::from("/vault/parts/BRACKE~1.SLD")));
        assert_eq!(
            variants.candidates(),
            &[
                PathBuf::from("/vault/parts/bracket.sldprt"),
                PathBuf::from("/vault/parts/BRACKE~1.SLD"),
            ]
        );

        let single = PathVariants::build(path, None);
        assert_eq!(single.candidates().len(), 1);
    }

    #[test]
    fn comparison_ignores_prefix_case_and_separators() {
        assert_eq!(
            normalize_for_compare(Path::new(r"\\?\C:\Vault\Parts\Bracket.SLDPRT")),
            normalize_for_compare(Path::new("c:/vault/parts/bracket.sldprt"))
        );
        assert_eq!(
            normalize_for_compare(Path::new(r"\\?\UNC\server\share\a.sldasm")),
            normalize_for_compare(Path::new(r"\\server\share\a.sldasm"))
        );

        let variants = PathVariants::build(Path::new("/vault/parts/bracket.sldprt"), None);
        assert!(variants.matches(Path::new("/VAULT/parts/Bracket.sldprt")));
        assert!(!variants.matches(Path::new("/vault/parts/other.sldprt")));
    }
}
