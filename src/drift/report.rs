use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::scan::PermissionReference;

/// A guard permission missing from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriticalFinding {
    pub permission: String,
    /// `file:line` of every guard referencing it.
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriftCounts {
    pub critical: usize,
    pub unused: usize,
    pub doc_only: usize,
    pub guard_references: usize,
    pub catalog_entries: usize,
    pub documented: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub generated_at: DateTime<Utc>,
    /// Referenced by guards, absent from the catalog. Fails the build.
    pub critical: Vec<CriticalFinding>,
    /// Seeded but never referenced by a guard.
    pub unused: Vec<String>,
    /// Documented but neither seeded nor referenced.
    pub doc_only: Vec<String>,
    pub counts: DriftCounts,
}

impl DriftReport {
    pub fn build(
        guards: &[PermissionReference],
        catalog: &BTreeSet<String>,
        documented: &BTreeSet<String>,
    ) -> Self {
        let mut referenced: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for reference in guards {
            referenced
                .entry(reference.permission.as_str())
                .or_default()
                .push(reference.location());
        }

        let critical: Vec<CriticalFinding> = referenced
            .iter()
            .filter(|(permission, _)| !catalog.contains(**permission))
            .map(|(permission, locations)| CriticalFinding {
                permission: permission.to_string(),
                locations: locations.clone(),
            })
            .collect();

        let unused: Vec<String> = catalog
            .iter()
            .filter(|permission| !referenced.contains_key(permission.as_str()))
            .cloned()
            .collect();

        let doc_only: Vec<String> = documented
            .iter()
            .filter(|permission| !catalog.contains(*permission) && !referenced.contains_key(permission.as_str()))
            .cloned()
            .collect();

        let counts = DriftCounts {
            critical: critical.len(),
            unused: unused.len(),
            doc_only: doc_only.len(),
            guard_references: guards.len(),
            catalog_entries: catalog.len(),
            documented: documented.len(),
        };

        Self {
            generated_at: Utc::now(),
            critical,
            unused,
            doc_only,
            counts,
        }
    }

    pub fn has_critical(&self) -> bool {
        !self.critical.is_empty()
    }

    /// 0 when clean, 1 when any critical finding exists.
    pub fn exit_code(&self) -> i32 {
        i32::from(self.has_critical())
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("failed to serialize drift report")?;
        fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        for finding in &self.critical {
            let _ = writeln!(
                out,
                "✗ CRITICAL {} is guarded but not seeded ({})",
                finding.permission,
                finding.locations.join(", ")
            );
        }
        for permission in &self.unused {
            let _ = writeln!(out, "· unused   {permission}");
        }
        for permission in &self.doc_only {
            let _ = writeln!(out, "· doc-only {permission}");
        }
        let _ = writeln!(
            out,
            "\n{} critical, {} unused, {} doc-only ({} guard references, {} catalog entries)",
            self.counts.critical,
            self.counts.unused,
            self.counts.doc_only,
            self.counts.guard_references,
            self.counts.catalog_entries
        );
        out
    }
}
