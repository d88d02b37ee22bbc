//! Error types for AssemblyBuilder.
//!
//! Library crates use [`AssemblyBuilderError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Every failure of an external collaborator (vault, CAD host, ERP) is
//! converted into one of these variants at the point of the call.

use std::path::PathBuf;

use regex::Regex;

/// Top-level error type for all AssemblyBuilder operations.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyBuilderError {
    /// The identifier has no usable match in the vault.
    #[error("not found in vault: {code}")]
    NotFound { code: String },

    /// The local copy is older than the vault's latest revision and could not be refreshed.
    #[error("local copy is stale: {path:?}")]
    StaleLocalCopy { path: PathBuf },

    /// A requested fetch did not produce a non-empty local file in time.
    #[error("timed out waiting for {path:?} to arrive from the vault")]
    FetchTimeout { path: PathBuf },

    /// Every insertion strategy failed for a resolvable file.
    #[error("insertion failed for {path:?} after {attempts} attempts")]
    InsertionFailed { path: PathBuf, attempts: usize },

    /// The host application became unreachable mid-run.
    #[error("host session lost: {reason}")]
    SessionLost { reason: String },

    /// The host application could not be launched or attached to.
    #[error("host unavailable: {0}")]
    HostUnavailable(String),

    /// The vault could not be logged in to.
    #[error("vault unavailable: {0}")]
    VaultUnavailable(String),

    /// A single vault call failed.
    #[error("vault error: {0}")]
    Vault(String),

    /// A single host automation call failed.
    #[error("host error ({kind}): {message}")]
    Host { kind: HostFailure, message: String },

    /// The ERP source could not produce a bill of materials.
    #[error("bom error: {0}")]
    Bom(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A background thread could not be started or ended abnormally.
    #[error("worker error: {0}")]
    Worker(String),

    /// Input validation error (empty code list, malformed catalog, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AssemblyBuilderError>;

impl AssemblyBuilderError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a host call error of the given kind.
    pub fn host(kind: HostFailure, msg: impl Into<String>) -> Self {
        Self::Host {
            kind,
            message: msg.into(),
        }
    }

    /// Shorthand for a host call that failed because the host went away.
    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::host(HostFailure::Disconnected, msg)
    }

    /// Whether this error means the host process can no longer be reached.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::SessionLost { .. }
                | Self::Host {
                    kind: HostFailure::Disconnected,
                    ..
                }
        )
    }

    /// Whether the host does not offer the called entry point at all.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Self::Host {
                kind: HostFailure::Unsupported,
                ..
            }
        )
    }

    /// Whether the vault session itself is gone, as opposed to one lookup failing.
    pub fn is_vault_outage(&self) -> bool {
        matches!(self, Self::VaultUnavailable(_))
    }
}

/// Typed classification of a failed host automation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFailure {
    /// The automation server detached from its clients or the process died.
    Disconnected,
    /// The host received the call and refused it (bad path, wrong document type, ...).
    Rejected,
    /// The entry point does not exist on this host version.
    Unsupported,
}

impl HostFailure {
    /// Classify raw automation error text against known disconnect signatures.
    ///
    /// Adapters call this once when converting a raw error; everything
    /// downstream branches on the returned kind.
    pub fn classify(message: &str, disconnect_signatures: &[Regex]) -> Self {
        if disconnect_signatures.iter().any(|re| re.is_match(message)) {
            Self::Disconnected
        } else {
            Self::Rejected
        }
    }
}

impl std::fmt::Display for HostFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Rejected => "rejected",
            Self::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = AssemblyBuilderError::config("missing vault name");
        assert_eq!(err.to_string(), "config error: missing vault name");

        let err = AssemblyBuilderError::NotFound {
            code: "2001234".into(),
        };
        assert!(err.to_string().contains("2001234"));
    }

    #[test]
    fn disconnect_detection() {
        assert!(AssemblyBuilderError::disconnected("gone").is_disconnect());
        assert!(
            AssemblyBuilderError::SessionLost {
                reason: "ping failed".into()
            }
            .is_disconnect()
        );
        assert!(!AssemblyBuilderError::host(HostFailure::Rejected, "bad path").is_disconnect());
        assert!(!AssemblyBuilderError::Vault("timeout".into()).is_disconnect());
    }

    #[test]
    fn unsupported_and_outage_kinds() {
        assert!(AssemblyBuilderError::host(HostFailure::Unsupported, "no such call").is_unsupported());
        assert!(!AssemblyBuilderError::host(HostFailure::Rejected, "bad path").is_unsupported());
        assert!(AssemblyBuilderError::VaultUnavailable("session expired".into()).is_vault_outage());
        assert!(!AssemblyBuilderError::Vault("no vault object".into()).is_vault_outage());
    }

    #[test]
    fn classify_against_signatures() {
        let signatures = vec![
            Regex::new("-2147417848").unwrap(),
            Regex::new("(?i)disconnected from its clients").unwrap(),
        ];
        assert_eq!(
            HostFailure::classify("(-2147417848, 'The object invoked has disconnected')", &signatures),
            HostFailure::Disconnected
        );
        assert_eq!(
            HostFailure::classify("Object DISCONNECTED FROM ITS CLIENTS", &signatures),
            HostFailure::Disconnected
        );
        assert_eq!(
            HostFailure::classify("file is read-only", &signatures),
            HostFailure::Rejected
        );
    }
}
