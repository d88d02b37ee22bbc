//! Application configuration for AssemblyBuilder.
//!
//! User config lives at `~/.assemblybuilder/assemblybuilder.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AssemblyBuilderError, Result};
use crate::types::FileKind;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "assemblybuilder.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".assemblybuilder";

// ---------------------------------------------------------------------------
// Config structs (matching assemblybuilder.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub vault: VaultConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub timings: TimingsConfig,

    #[serde(default)]
    pub run: RunDefaultsConfig,

    #[serde(default)]
    pub dialogs: DialogsConfig,

    #[serde(default)]
    pub keepalive: KeepAliveConfig,
}

/// `[vault]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Vault name used for automatic login.
    #[serde(default = "default_vault_name")]
    pub name: String,

    /// Local vault view chosen on this machine; search paths are re-rooted here.
    #[serde(default)]
    pub local_root: Option<String>,

    /// Data-card attributes searched for the part code, in priority order.
    #[serde(default = "default_attributes")]
    pub attributes: Vec<String>,

    /// Accepted CAD file extensions (lowercase, with dot).
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Seconds between vault login attempts.
    #[serde(default = "default_connect_retry_secs")]
    pub connect_retry_secs: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            name: default_vault_name(),
            local_root: None,
            attributes: default_attributes(),
            extensions: default_extensions(),
            connect_retry_secs: default_connect_retry_secs(),
        }
    }
}

fn default_vault_name() -> String {
    "PGR2024".into()
}
fn default_attributes() -> Vec<String> {
    ["SAP Numarası", "SAP Numarasi", "SAP No", "SAP NO"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_extensions() -> Vec<String> {
    vec![".sldprt".into(), ".sldasm".into()]
}
fn default_connect_retry_secs() -> u64 {
    60
}

/// `[host]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Assembly template path; empty means the host's own default.
    #[serde(default)]
    pub template: String,

    /// Distance in metres between consecutively placed components.
    #[serde(default = "default_offset_step")]
    pub offset_step_m: f64,

    /// Seconds to wait for a freshly launched host to accept automation calls.
    #[serde(default = "default_launch_timeout")]
    pub launch_timeout_secs: u64,

    /// Regular expressions identifying "automation server disconnected" errors.
    #[serde(default = "default_disconnect_signatures")]
    pub disconnect_signatures: Vec<String>,

    /// How many full restarts a single run may perform before giving up.
    #[serde(default = "default_max_restarts")]
    pub max_session_restarts: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            template: String::new(),
            offset_step_m: default_offset_step(),
            launch_timeout_secs: default_launch_timeout(),
            disconnect_signatures: default_disconnect_signatures(),
            max_session_restarts: default_max_restarts(),
        }
    }
}

fn default_offset_step() -> f64 {
    0.3
}
fn default_launch_timeout() -> u64 {
    30
}
fn default_disconnect_signatures() -> Vec<String> {
    [
        "istemcilerinden ayrılmış",
        "-2147417848",
        "<unknown>",
        "(?i)disconnected from its clients",
        "(?i)RPC server is unavailable",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_max_restarts() -> u32 {
    5
}

/// `[timings]` section (all values in milliseconds unless noted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingsConfig {
    #[serde(default = "default_fetch_poll_ms")]
    pub fetch_poll_ms: u64,
    /// Number of polls before a fetch is declared timed out.
    #[serde(default = "default_fetch_poll_attempts")]
    pub fetch_poll_attempts: u32,
    #[serde(default = "default_open_settle_ms")]
    pub open_settle_ms: u64,
    #[serde(default = "default_insert_settle_ms")]
    pub insert_settle_ms: u64,
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,
    #[serde(default = "default_launch_poll_ms")]
    pub launch_poll_ms: u64,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            fetch_poll_ms: default_fetch_poll_ms(),
            fetch_poll_attempts: default_fetch_poll_attempts(),
            open_settle_ms: default_open_settle_ms(),
            insert_settle_ms: default_insert_settle_ms(),
            pause_poll_ms: default_pause_poll_ms(),
            launch_poll_ms: default_launch_poll_ms(),
        }
    }
}

fn default_fetch_poll_ms() -> u64 {
    250
}
fn default_fetch_poll_attempts() -> u32 {
    30
}
fn default_open_settle_ms() -> u64 {
    1500
}
fn default_insert_settle_ms() -> u64 {
    300
}
fn default_pause_poll_ms() -> u64 {
    500
}
fn default_launch_poll_ms() -> u64 {
    1000
}

/// `[run]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDefaultsConfig {
    #[serde(default)]
    pub append_to_existing: bool,
    #[serde(default = "default_true")]
    pub abort_on_not_found: bool,
    /// Abort a batch-mode build when a resolvable file cannot be inserted.
    #[serde(default)]
    pub abort_on_insert_failure: bool,
    #[serde(default = "default_true")]
    pub dedupe: bool,
    #[serde(default = "default_true")]
    pub filter_noise: bool,
}

impl Default for RunDefaultsConfig {
    fn default() -> Self {
        Self {
            append_to_existing: false,
            abort_on_not_found: true,
            abort_on_insert_failure: false,
            dedupe: true,
            filter_noise: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// `[dialogs]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogsConfig {
    /// Window title fragments that identify dialogs to dismiss.
    #[serde(default = "default_dialog_titles")]
    pub titles: Vec<String>,
    /// Button captions that dismiss a dialog, in preference order.
    #[serde(default = "default_dismiss_texts")]
    pub dismiss_texts: Vec<String>,
    #[serde(default = "default_dialog_poll_ms")]
    pub poll_ms: u64,
}

impl Default for DialogsConfig {
    fn default() -> Self {
        Self {
            titles: default_dialog_titles(),
            dismiss_texts: default_dismiss_texts(),
            poll_ms: default_dialog_poll_ms(),
        }
    }
}

fn default_dialog_titles() -> Vec<String> {
    [
        "SOLIDWORKS PDM",
        "Kasadan Al",
        "Check Out",
        "Kullanıma Al",
        "Get Latest Version",
        "Son Sürümü Al",
        "Sorun Ne",
        "What's Wrong",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_dismiss_texts() -> Vec<String> {
    ["Hayır", "İptal", "No", "Cancel", "Vazgeç", "Kapat", "Close"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_dialog_poll_ms() -> u64 {
    500
}

/// `[keepalive]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    /// Seconds between keep-alive pings; 0 disables the pinger.
    #[serde(default)]
    pub interval_secs: u64,
}

// ---------------------------------------------------------------------------
// Runtime settings (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime vault settings.
#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub name: String,
    pub local_root: Option<PathBuf>,
    pub attributes: Vec<String>,
    /// Lowercase extensions including the leading dot.
    pub extensions: Vec<String>,
    pub connect_retry: Duration,
}

impl From<&AppConfig> for VaultSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            name: config.vault.name.clone(),
            local_root: config
                .vault
                .local_root
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            attributes: config.vault.attributes.clone(),
            extensions: config
                .vault
                .extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            connect_retry: Duration::from_secs(config.vault.connect_retry_secs),
        }
    }
}

/// Runtime host settings with compiled disconnect signatures.
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub template: Option<String>,
    pub offset_step_m: f64,
    pub launch_timeout: Duration,
    pub disconnect_signatures: Vec<Regex>,
    pub max_session_restarts: u32,
}

impl TryFrom<&AppConfig> for HostSettings {
    type Error = AssemblyBuilderError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let disconnect_signatures = config
            .host
            .disconnect_signatures
            .iter()
            .map(|s| {
                Regex::new(s).map_err(|e| {
                    AssemblyBuilderError::config(format!("invalid disconnect signature '{s}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if !(config.host.offset_step_m.is_finite() && config.host.offset_step_m > 0.0) {
            return Err(AssemblyBuilderError::config(
                "host.offset_step_m must be a positive number",
            ));
        }

        Ok(Self {
            template: Some(config.host.template.clone()).filter(|t| !t.is_empty()),
            offset_step_m: config.host.offset_step_m,
            launch_timeout: Duration::from_secs(config.host.launch_timeout_secs),
            disconnect_signatures,
            max_session_restarts: config.host.max_session_restarts,
        })
    }
}

/// Blocking waits used by the worker thread.
#[derive(Debug, Clone)]
pub struct Timings {
    pub fetch_poll: Duration,
    pub fetch_poll_attempts: u32,
    pub open_settle: Duration,
    pub insert_settle: Duration,
    pub pause_poll: Duration,
    pub launch_poll: Duration,
}

impl Timings {
    /// Zero-length waits, for tests and simulations.
    pub fn immediate() -> Self {
        Self {
            fetch_poll: Duration::ZERO,
            fetch_poll_attempts: 3,
            open_settle: Duration::ZERO,
            insert_settle: Duration::ZERO,
            pause_poll: Duration::from_millis(1),
            launch_poll: Duration::ZERO,
        }
    }
}

impl From<&AppConfig> for Timings {
    fn from(config: &AppConfig) -> Self {
        let t = &config.timings;
        Self {
            fetch_poll: Duration::from_millis(t.fetch_poll_ms),
            fetch_poll_attempts: t.fetch_poll_attempts,
            open_settle: Duration::from_millis(t.open_settle_ms),
            insert_settle: Duration::from_millis(t.insert_settle_ms),
            pause_poll: Duration::from_millis(t.pause_poll_ms),
            launch_poll: Duration::from_millis(t.launch_poll_ms),
        }
    }
}

/// Everything the orchestrator needs, resolved from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub vault: VaultSettings,
    pub host: HostSettings,
    pub timings: Timings,
    pub abort_on_insert_failure: bool,
    pub dedupe: bool,
    pub filter_noise: bool,
    pub dialog_titles: Vec<String>,
    pub dismiss_texts: Vec<String>,
    pub dialog_poll: Duration,
    pub keepalive_interval: Option<Duration>,
}

impl TryFrom<&AppConfig> for RunConfig {
    type Error = AssemblyBuilderError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        if config.vault.attributes.is_empty() {
            return Err(AssemblyBuilderError::config(
                "vault.attributes must name at least one attribute",
            ));
        }
        if config.vault.extensions.is_empty() {
            return Err(AssemblyBuilderError::config(
                "vault.extensions must list at least one extension",
            ));
        }
        for ext in &config.vault.extensions {
            let sample = format!("file{}", ext.to_ascii_lowercase());
            if FileKind::from_path(Path::new(&sample)).is_none() {
                return Err(AssemblyBuilderError::config(format!(
                    "vault.extensions entry '{ext}' is neither a part (.sldprt) nor an assembly (.sldasm)"
                )));
            }
        }
        Ok(Self {
            vault: VaultSettings::from(config),
            host: HostSettings::try_from(config)?,
            timings: Timings::from(config),
            abort_on_insert_failure: config.run.abort_on_insert_failure,
            dedupe: config.run.dedupe,
            filter_noise: config.run.filter_noise,
            dialog_titles: config.dialogs.titles.clone(),
            dismiss_texts: config.dialogs.dismiss_texts.clone(),
            dialog_poll: Duration::from_millis(config.dialogs.poll_ms),
            keepalive_interval: Some(config.keepalive.interval_secs)
                .filter(|s| *s > 0)
                .map(Duration::from_secs),
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.assemblybuilder/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AssemblyBuilderError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.assemblybuilder/assemblybuilder.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content =
        std::fs::read_to_string(path).map_err(|e| AssemblyBuilderError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        AssemblyBuilderError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AssemblyBuilderError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config)
        .map_err(|e| AssemblyBuilderError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AssemblyBuilderError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("PGR2024"));
        assert!(toml_str.contains("offset_step_m"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.vault.attributes.len(), 4);
        assert_eq!(parsed.timings.fetch_poll_attempts, 30);
        assert!(parsed.run.abort_on_not_found);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[vault]
name = "TEST"
local_root = "D:/PDM/TEST"

[host]
offset_step_m = 0.5
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.vault.name, "TEST");
        assert_eq!(config.vault.extensions, vec![".sldprt", ".sldasm"]);
        assert_eq!(config.host.max_session_restarts, 5);
        assert_eq!(config.dialogs.poll_ms, 500);
    }

    #[test]
    fn run_config_from_app_config() {
        let app = AppConfig::default();
        let run = RunConfig::try_from(&app).expect("valid defaults");
        assert_eq!(run.vault.connect_retry, Duration::from_secs(60));
        assert_eq!(run.timings.fetch_poll, Duration::from_millis(250));
        assert!(run.host.template.is_none());
        assert!(run.vault.local_root.is_none());
        assert!(run.keepalive_interval.is_none());
        assert_eq!(run.host.disconnect_signatures.len(), 5);
    }

    #[test]
    fn invalid_signature_is_config_error() {
        let mut app = AppConfig::default();
        app.host.disconnect_signatures = vec!["(unclosed".into()];
        let err = RunConfig::try_from(&app).unwrap_err();
        assert!(err.to_string().contains("invalid disconnect signature"));
    }

    #[test]
    fn extensions_must_map_to_a_file_kind() {
        let mut app = AppConfig::default();
        app.vault.extensions = vec![".SLDPRT".into(), ".slddrw".into()];
        let err = RunConfig::try_from(&app).unwrap_err();
        assert!(err.to_string().contains("'.slddrw'"));

        app.vault.extensions = vec!["sldprt".into()];
        assert!(RunConfig::try_from(&app).is_err());

        app.vault.extensions.clear();
        assert!(RunConfig::try_from(&app).is_err());

        app.vault.extensions = vec![".SLDASM".into()];
        assert!(RunConfig::try_from(&app).is_ok());
    }

    #[test]
    fn non_positive_step_rejected() {
        let mut app = AppConfig::default();
        app.host.offset_step_m = 0.0;
        assert!(HostSettings::try_from(&app).is_err());
    }
}
