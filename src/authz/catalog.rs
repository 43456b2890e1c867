use std::collections::{BTreeMap, BTreeSet};

use super::permission::PermissionName;
use super::store::RoleGrantStore;
use crate::errors::AppError;
use crate::models::rbac::Permission;

/// Read-only registry of seeded permissions, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct PermissionCatalog {
    entries: BTreeMap<PermissionName, Permission>,
}

impl PermissionCatalog {
    pub fn from_entries(entries: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.name.clone(), entry))
                .collect(),
        }
    }

    /// Loads the catalog from the store. An empty catalog is a configuration error.
    pub async fn load(store: &dyn RoleGrantStore) -> Result<Self, AppError> {
        let entries = store.list_permission_catalog().await.map_err(|err| {
            AppError::configuration(format!("failed to load permission catalog: {err}"))
        })?;

        let catalog = Self::from_entries(entries);
        if catalog.is_empty() {
            return Err(AppError::configuration(
                "permission catalog is empty; seed the permissions table before starting",
            ));
        }

        tracing::info!(permissions = catalog.len(), "permission catalog loaded");
        Ok(catalog)
    }

    pub fn get(&self, name: &PermissionName) -> Option<&Permission> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &PermissionName) -> bool {
        self.entries.contains_key(name)
    }

    /// Entries for one resource, in name order.
    pub fn for_resource<'a>(&'a self, resource: &'a str) -> impl Iterator<Item = &'a Permission> + 'a {
        self.entries
            .values()
            .filter(move |entry| entry.resource() == resource)
    }

    pub fn by_category(&self) -> BTreeMap<&str, Vec<&Permission>> {
        let mut groups: BTreeMap<&str, Vec<&Permission>> = BTreeMap::new();
        for entry in self.entries.values() {
            groups.entry(entry.category.as_str()).or_default().push(entry);
        }
        groups
    }

    pub fn names(&self) -> BTreeSet<PermissionName> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
