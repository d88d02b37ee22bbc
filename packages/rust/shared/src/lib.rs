//! Shared types, error model, and configuration for AssemblyBuilder.
//!
//! This crate is the foundation depended on by all other AssemblyBuilder crates.
//! It provides:
//! - [`AssemblyBuilderError`]: the unified error type
//! - Domain types ([`PartCode`], [`ResolvedFile`], [`RunStatus`], [`LogEvent`], [`RunStats`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DialogsConfig, HostConfig, HostSettings, KeepAliveConfig, RunConfig,
    RunDefaultsConfig, Timings, TimingsConfig, VaultConfig, VaultSettings, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{AssemblyBuilderError, HostFailure, Result};
pub use types::{
    FileKind, LogEvent, PartCode, ResolvedFile, RunId, RunOptions, RunStats, RunStatus, Severity,
};
