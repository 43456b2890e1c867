//! Offline consistency check between guarded, seeded and documented
//! permission names.

use std::collections::BTreeSet;
use std::path::PathBuf;

pub mod report;
pub mod scan;

pub use report::{CriticalFinding, DriftCounts, DriftReport};
pub use scan::{PermissionReference, Scanner};

pub const DEFAULT_REPORT_PATH: &str = "target/rbac-drift-report.json";

/// Where each input of the check lives.
#[derive(Debug, Clone)]
pub struct DriftInputs {
    /// Rust sources scanned for guard calls.
    pub code: Vec<PathBuf>,
    /// Seed SQL defining the catalog.
    pub catalog: Vec<PathBuf>,
    /// Markdown documentation.
    pub docs: Vec<PathBuf>,
}

impl Default for DriftInputs {
    fn default() -> Self {
        Self {
            code: vec![PathBuf::from("src")],
            catalog: vec![PathBuf::from("migrations")],
            docs: vec![PathBuf::from("docs")],
        }
    }
}

pub fn run(inputs: &DriftInputs) -> anyhow::Result<DriftReport> {
    let scanner = Scanner::new()?;

    let mut guards = Vec::new();
    for file in scan::collect_files(&inputs.code, &["rs"])? {
        let source = scan::read(&file)?;
        guards.extend(scanner.guard_references(&file, &source));
    }

    let mut catalog = BTreeSet::new();
    for file in scan::collect_files(&inputs.catalog, &["sql"])? {
        catalog.extend(scanner.seeded_permissions(&scan::read(&file)?));
    }
    if catalog.is_empty() {
        tracing::warn!("no seeded permissions found; every guard will be reported as critical");
    }

    let mut documented = BTreeSet::new();
    for file in scan::collect_files(&inputs.docs, &["md"])? {
        documented.extend(scanner.documented_permissions(&scan::read(&file)?));
    }

    Ok(DriftReport::build(&guards, &catalog, &documented))
}
