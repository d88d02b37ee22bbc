//! CAD host side of AssemblyBuilder.
//!
//! - [`session`]: attach/launch the host and pin the target assembly
//! - [`inserter`]: the ordered insertion strategy chain and placement offsets
//! - [`finalizer`]: best-effort cleanup pass over a finished assembly
//! - [`simulation`]: in-memory host with fault injection

pub mod client;
pub mod finalizer;
pub mod inserter;
pub mod paths;
pub mod session;
pub mod simulation;

pub use client::{
    ComponentRef, DocumentKind, EntryPoint, HostApp, HostConnector, HostDocument, InsertCall,
    Placement, Transform,
};
pub use finalizer::{FinalizeReport, Finalizer};
pub use inserter::{
    AttemptError, ComponentInserter, InsertStep, InsertionOutcome, InsertionReport, first_success,
};
pub use paths::{PathVariants, long_path_safe, normalize_for_compare};
pub use session::{AssemblySession, AssemblyTarget, HostSessionManager};
pub use simulation::SimHost;
