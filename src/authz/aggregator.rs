use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::catalog::PermissionCatalog;
use super::permission::{scope_satisfies, PermissionName};
use super::resolver::RoleResolver;
use super::store::RoleGrantStore;
use crate::errors::StoreError;
use crate::models::rbac::EffectivePermissionsResponse;

/// Name reported for users with no role assignment. It grants nothing.
pub const IMPLICIT_DEFAULT_ROLE: &str = "no_access";

/// Effective permissions of a user inside one company (or globally).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectivePermissionSet {
    pub user_id: Uuid,
    pub company_id: Option<Uuid>,
    /// Originating role names, global roles first.
    pub roles: Vec<String>,
    pub permissions: BTreeSet<PermissionName>,
    /// Permissions removed by active revocations.
    pub revoked: BTreeSet<PermissionName>,
}

impl EffectivePermissionSet {
    pub fn contains(&self, name: &PermissionName) -> bool {
        self.permissions.contains(name)
    }

    /// Held permissions on the same resource:action whose scope can satisfy
    /// `requested`, broadest scope first.
    pub fn satisfying<'a>(&'a self, requested: &'a PermissionName) -> Vec<&'a PermissionName> {
        let mut candidates: Vec<&PermissionName> = self
            .permissions
            .iter()
            .filter(|held| held.same_target(requested) && scope_satisfies(held.scope(), requested.scope()))
            .collect();
        candidates.sort_by(|a, b| b.scope().rank().cmp(&a.scope().rank()).then_with(|| a.cmp(b)));
        candidates
    }

    pub fn role_names(&self) -> Vec<String> {
        if self.roles.is_empty() {
            vec![IMPLICIT_DEFAULT_ROLE.to_string()]
        } else {
            self.roles.clone()
        }
    }

    pub fn permission_names(&self) -> Vec<String> {
        self.permissions.iter().map(ToString::to_string).collect()
    }
}

impl From<EffectivePermissionSet> for EffectivePermissionsResponse {
    fn from(set: EffectivePermissionSet) -> Self {
        EffectivePermissionsResponse {
            user_id: set.user_id,
            company_id: set.company_id,
            roles: set.role_names(),
            permissions: set.permissions.into_iter().collect(),
            revoked: set.revoked.into_iter().collect(),
        }
    }
}

/// Computes effective permission sets from roles and direct grants.
#[derive(Clone)]
pub struct PermissionAggregator {
    resolver: RoleResolver,
    store: Arc<dyn RoleGrantStore>,
    catalog: Arc<PermissionCatalog>,
}

impl PermissionAggregator {
    pub fn new(store: Arc<dyn RoleGrantStore>, catalog: Arc<PermissionCatalog>) -> Self {
        Self {
            resolver: RoleResolver::new(store.clone()),
            store,
            catalog,
        }
    }

    pub async fn aggregate(
        &self,
        user_id: Uuid,
        company_id: Option<Uuid>,
    ) -> Result<EffectivePermissionSet, StoreError> {
        self.aggregate_at(user_id, company_id, Utc::now()).await
    }

    /// Any store failure aborts the whole aggregation; a partial set is never returned.
    pub async fn aggregate_at(
        &self,
        user_id: Uuid,
        company_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<EffectivePermissionSet, StoreError> {
        let assignments = self.resolver.resolve(user_id).await?;
        let applicable: Vec<_> = assignments
            .into_iter()
            .filter(|assignment| assignment.applies_to(company_id))
            .collect();

        let mut role_ids: Vec<Uuid> = Vec::with_capacity(applicable.len());
        for assignment in &applicable {
            if !role_ids.contains(&assignment.role_id) {
                role_ids.push(assignment.role_id);
            }
        }
        let roles = if role_ids.is_empty() {
            Vec::new()
        } else {
            self.store.get_roles(&role_ids).await?
        };

        let mut role_names = Vec::new();
        let mut permissions = BTreeSet::new();
        // Walk in assignment order so role names keep the global-first order.
        for role_id in &role_ids {
            let Some(role) = roles.iter().find(|role| &role.id == role_id) else {
                tracing::warn!(user_id = %user_id, role_id = %role_id, "assigned role has no record; skipping");
                continue;
            };
            if !role_names.contains(&role.name) {
                role_names.push(role.name.clone());
            }
            if role.is_admin() {
                permissions.extend(self.catalog.names());
            }
            permissions.extend(role.permissions.iter().cloned());
        }

        let grants = match company_id {
            Some(company_id) => self.store.get_active_direct_grants(user_id, company_id).await?,
            None => Vec::new(),
        };

        let effective: Vec<_> = grants
            .into_iter()
            .filter(|grant| {
                grant.user_id == user_id
                    && Some(grant.company_id) == company_id
                    && grant.is_effective_at(now)
            })
            .collect();

        for grant in effective.iter().filter(|grant| grant.granted) {
            permissions.insert(grant.permission.clone());
        }

        // Subtract only after every grant source has been merged.
        let mut revoked = BTreeSet::new();
        for grant in effective.iter().filter(|grant| grant.is_revocation()) {
            permissions.remove(&grant.permission);
            revoked.insert(grant.permission.clone());
        }

        Ok(EffectivePermissionSet {
            user_id,
            company_id,
            roles: role_names,
            permissions,
            revoked,
        })
    }
}
