//! Host collaborator interface.
//!
//! The host is a 3-D assembly editor exposed as an automation object. Its
//! handles are not thread-safe: everything except [`HostConnector`] stays on
//! the worker thread that created it.
//!
//! Implementations convert raw automation failures into
//! [`AssemblyBuilderError::Host`](assemblybuilder_shared::AssemblyBuilderError::Host)
//! with a [`HostFailure`](assemblybuilder_shared::HostFailure) kind at the
//! point of the call.

use std::path::{Path, PathBuf};

use assemblybuilder_shared::{FileKind, Result};

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// Document types the host distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Part,
    Assembly,
}

impl From<FileKind> for DocumentKind {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::Part => Self::Part,
            FileKind::SubAssembly => Self::Assembly,
        }
    }
}

/// A component placed in an assembly document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRef {
    /// Instance name, unique within the assembly (e.g. `bracket-1`).
    pub name: String,
    /// Path of the referenced document, when the host reports it.
    pub path: Option<PathBuf>,
}

/// Rigid transform: row-major 3x3 rotation plus translation in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub rotation: [f64; 9],
    pub translation: [f64; 3],
}

impl Transform {
    /// Identity rotation shifted along Z.
    pub fn along_z(z: f64) -> Self {
        Self {
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            translation: [0.0, 0.0, z],
        }
    }

    pub fn z(&self) -> f64 {
        self.translation[2]
    }
}

/// Where an entry point places the new component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    Transform(Transform),
    Offset { x: f64, y: f64, z: f64 },
}

impl Placement {
    pub fn z(&self) -> f64 {
        match self {
            Self::Transform(t) => t.z(),
            Self::Offset { z, .. } => *z,
        }
    }
}

/// Host API entry points that insert a component, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// Insert an existing document with a full transform.
    InsertWithTransform,
    /// Add with a transform and a named configuration.
    AddWithTransform,
    /// Add at an offset with a configuration; the `u8` is the host's
    /// configuration-option selector (0, 1 or 2).
    AddWithConfiguration(u8),
    /// Legacy insert at an offset.
    InsertAtOffset,
    /// Older positional add.
    AddPositional,
    /// Oldest, simplest add.
    AddBasic,
}

impl EntryPoint {
    /// The order in which entry points are tried.
    pub const PRIORITY: [EntryPoint; 8] = [
        EntryPoint::InsertWithTransform,
        EntryPoint::AddWithTransform,
        EntryPoint::AddWithConfiguration(0),
        EntryPoint::AddWithConfiguration(1),
        EntryPoint::AddWithConfiguration(2),
        EntryPoint::InsertAtOffset,
        EntryPoint::AddPositional,
        EntryPoint::AddBasic,
    ];

    /// Whether this entry point takes a transform rather than a plain offset.
    pub fn takes_transform(self) -> bool {
        matches!(self, Self::InsertWithTransform | Self::AddWithTransform)
    }

    /// Whether this entry point accepts a configuration name.
    pub fn takes_configuration(self) -> bool {
        matches!(self, Self::AddWithTransform | Self::AddWithConfiguration(_))
    }
}

impl std::fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsertWithTransform => f.write_str("insert-with-transform"),
            Self::AddWithTransform => f.write_str("add-with-transform"),
            Self::AddWithConfiguration(option) => write!(f, "add-with-configuration-{option}"),
            Self::InsertAtOffset => f.write_str("insert-at-offset"),
            Self::AddPositional => f.write_str("add-positional"),
            Self::AddBasic => f.write_str("add-basic"),
        }
    }
}

/// One call to an insertion entry point.
#[derive(Debug, Clone)]
pub struct InsertCall<'a> {
    pub entry_point: EntryPoint,
    pub path: &'a Path,
    pub placement: Placement,
    pub configuration: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Finds or starts the host process.
pub trait HostConnector: Send + Sync {
    /// Attach to an already-running host. `Ok(None)` when none is running.
    fn attach_running(&self) -> Result<Option<Box<dyn HostApp>>>;

    /// Start a new host process. It may not accept calls immediately.
    fn launch_new(&self) -> Result<Box<dyn HostApp>>;
}

/// Handle to a running host process.
pub trait HostApp {
    /// Trivial property read; any error means the session is dead.
    fn ping(&self) -> Result<()>;

    fn open_document_titles(&self) -> Result<Vec<String>>;

    /// The document that currently has focus, if any.
    fn active_document(&self) -> Result<Option<Box<dyn HostDocument>>>;

    /// Bring the titled document to the front and return it.
    fn activate_document(&self, title: &str) -> Result<Option<Box<dyn HostDocument>>>;

    /// The host's configured default template for new assemblies.
    fn default_assembly_template(&self) -> Result<String>;

    /// Create a new document from `template`. `Ok(None)` if the host refused.
    fn new_document(&self, template: &str, kind: DocumentKind) -> Result<Option<Box<dyn HostDocument>>>;

    /// Open a document non-interactively so the vault's retrieval hook can run.
    fn open_document(&self, path: &Path, kind: DocumentKind) -> Result<Option<Box<dyn HostDocument>>>;

    fn close_document(&self, title: &str) -> Result<()>;

    /// Operating-system short form of `path`, where the platform has one.
    fn short_path_name(&self, _path: &Path) -> Option<PathBuf> {
        None
    }
}

/// Handle to one open document.
pub trait HostDocument {
    fn title(&self) -> Result<String>;

    fn kind(&self) -> Result<DocumentKind>;

    fn configuration_names(&self) -> Result<Vec<String>>;

    /// Top-level components of an assembly document.
    fn components(&self) -> Result<Vec<ComponentRef>>;

    /// Call one insertion entry point. `Ok(None)` means the host returned no
    /// reference, which does not by itself mean nothing was inserted.
    fn insert_component(&self, call: &InsertCall<'_>) -> Result<Option<ComponentRef>>;

    /// Release a "fixed" constraint on the component.
    fn unfix_component(&self, component: &ComponentRef) -> Result<()>;

    /// Mark a component to be solved as flexible.
    fn set_flexible(&self, component: &ComponentRef) -> Result<()>;

    fn show_isometric_view(&self) -> Result<()>;

    fn zoom_to_fit(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_is_most_specific_first() {
        assert_eq!(EntryPoint::PRIORITY[0], EntryPoint::InsertWithTransform);
        assert_eq!(EntryPoint::PRIORITY[7], EntryPoint::AddBasic);
        let transform_count = EntryPoint::PRIORITY
            .iter()
            .filter(|e| e.takes_transform())
            .count();
        assert_eq!(transform_count, 2);
        assert!(EntryPoint::PRIORITY[..2].iter().all(|e| e.takes_transform()));
    }

    #[test]
    fn placement_reports_z() {
        assert_eq!(Placement::Transform(Transform::along_z(-0.6)).z(), -0.6);
        assert_eq!(Placement::Offset { x: 0.0, y: 0.0, z: -0.3 }.z(), -0.3);
    }

    #[test]
    fn document_kind_follows_file_kind() {
        assert_eq!(DocumentKind::from(FileKind::Part), DocumentKind::Part);
        assert_eq!(DocumentKind::from(FileKind::SubAssembly), DocumentKind::Assembly);
        assert_eq!(EntryPoint::AddWithConfiguration(2).to_string(), "add-with-configuration-2");
    }
}
