//! Kit (bill of materials) expansion.
//!
//! A kit code is expanded through the ERP collaborator into component codes,
//! and each kit becomes one complete build pass.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use assemblybuilder_shared::{AssemblyBuilderError, Result};

/// Descriptions longer than this are cut in the log table.
const DESCRIPTION_WIDTH: usize = 40;
const RULE_WIDTH: usize = 68;

/// Kit header as reported by the ERP source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BomHeader {
    pub material: String,
    #[serde(default)]
    pub description: String,
}

/// One component row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BomLine {
    pub code: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub description: String,
}

/// A kit's bill of materials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bom {
    #[serde(default)]
    pub header: Option<BomHeader>,
    #[serde(default)]
    pub lines: Vec<BomLine>,
}

impl Bom {
    /// Non-empty component codes in row order.
    pub fn component_codes(&self) -> Vec<String> {
        self.lines
            .iter()
            .map(|line| line.code.trim())
            .filter(|code| !code.is_empty())
            .map(String::from)
            .collect()
    }
}

/// ERP collaborator that expands a kit code.
pub trait BomSource: Send + Sync {
    fn bom(&self, kit_code: &str) -> Result<Bom>;
}

/// Fixed table of BOMs, keyed by kit code.
#[derive(Debug, Clone, Default)]
pub struct StaticBomSource {
    boms: HashMap<String, Bom>,
}

impl StaticBomSource {
    pub fn new(boms: HashMap<String, Bom>) -> Self {
        Self { boms }
    }

    pub fn insert(&mut self, kit_code: impl Into<String>, bom: Bom) {
        self.boms.insert(kit_code.into(), bom);
    }
}

impl BomSource for StaticBomSource {
    fn bom(&self, kit_code: &str) -> Result<Bom> {
        self.boms
            .get(kit_code)
            .cloned()
            .ok_or_else(|| AssemblyBuilderError::Bom(format!("no bill of materials for kit {kit_code}")))
    }
}

/// Fixed-width log table of a BOM, one entry per line.
pub fn format_bom_table(bom: &Bom) -> Vec<String> {
    let mut out = Vec::with_capacity(bom.lines.len() + 4);

    if let Some(header) = bom.header.as_ref().filter(|h| !h.material.is_empty()) {
        out.push(format!(
            "KIT: {}  |  DESCRIPTION: {}",
            header.material, header.description
        ));
        out.push("=".repeat(RULE_WIDTH));
    }

    out.push(format!(
        "{:<2} | {:<9} | {:<40} | {}",
        "NO", "COMPONENT", "DESCRIPTION", "QTY"
    ));
    out.push("-".repeat(RULE_WIDTH));

    for (i, line) in bom.lines.iter().enumerate() {
        out.push(format!(
            "{:<2} | {:<9} | {:<40} | {}",
            i + 1,
            line.code,
            truncate(&line.description),
            line.quantity
        ));
    }
    out
}

fn truncate(description: &str) -> String {
    if description.chars().count() > DESCRIPTION_WIDTH {
        let cut: String = description.chars().take(DESCRIPTION_WIDTH).collect();
        format!("{cut}...")
    } else {
        description.to_string()
    }
}
