//! Vault side of AssemblyBuilder.
//!
//! Resolves part codes to files in the document vault and keeps the local
//! copies at the latest checked-in revision.

pub mod client;
pub mod freshness;
pub mod paths;
pub mod resolver;
pub mod simulation;

pub use client::{FileId, FolderId, SearchHit, VaultConnector, VaultFileHandle, VaultSession};
pub use freshness::{Freshness, FreshnessReconciler};
pub use paths::map_vault_path;
pub use resolver::{MatchSource, Resolution, VaultResolver};
pub use simulation::{SimFile, SimVault};
