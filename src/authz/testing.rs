//! Hand-written fakes shared by the authz unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::permission::PermissionName;
use super::store::RoleGrantStore;
use super::{AuditSink, Decision, PermissionCatalog};
use crate::errors::StoreError;
use crate::models::rbac::{DirectGrant, Permission, Role, RoleAssignment};

pub fn perm(name: &str) -> PermissionName {
    name.parse().expect("valid permission name")
}

pub fn catalog_entry(name: &str) -> Permission {
    Permission {
        name: perm(name),
        description: format!("{name} description"),
        category: "test".to_string(),
    }
}

pub fn role(name: &str, permissions: &[&str]) -> Role {
    Role {
        id: Uuid::new_v4(),
        name: name.to_string(),
        permissions: permissions.iter().map(|p| perm(p)).collect(),
    }
}

pub fn direct_grant(
    user_id: Uuid,
    company_id: Uuid,
    permission: &str,
    granted: bool,
    expires_at: Option<DateTime<Utc>>,
) -> DirectGrant {
    DirectGrant {
        id: Uuid::new_v4(),
        user_id,
        company_id,
        permission: perm(permission),
        granted,
        granted_by: None,
        granted_at: Utc::now(),
        expires_at,
        is_active: true,
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub assignments: Mutex<Vec<RoleAssignment>>,
    pub roles: Mutex<Vec<Role>>,
    pub grants: Mutex<Vec<DirectGrant>>,
    pub catalog: Mutex<Vec<Permission>>,
    pub unavailable: AtomicBool,
    pub assignment_calls: AtomicUsize,
    /// Added latency for role-assignment lookups, in milliseconds.
    pub latency_ms: AtomicU64,
}

impl FakeStore {
    pub async fn add_role(&self, role: Role) -> Uuid {
        let id = role.id;
        self.roles.lock().await.push(role);
        id
    }

    pub async fn assign(&self, user_id: Uuid, role_id: Uuid, company_id: Option<Uuid>) {
        self.assignments.lock().await.push(RoleAssignment {
            user_id,
            role_id,
            company_id,
        });
    }

    pub async fn add_grant(&self, grant: DirectGrant) {
        self.grants.lock().await.push(grant);
    }

    pub fn assignment_calls(&self) -> usize {
        self.assignment_calls.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RoleGrantStore for FakeStore {
    async fn get_role_assignments(&self, user_id: Uuid) -> Result<Vec<RoleAssignment>, StoreError> {
        self.assignment_calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.check()?;
        Ok(self
            .assignments
            .lock()
            .await
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_roles(&self, role_ids: &[Uuid]) -> Result<Vec<Role>, StoreError> {
        self.check()?;
        Ok(self
            .roles
            .lock()
            .await
            .iter()
            .filter(|r| role_ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn get_active_direct_grants(
        &self,
        user_id: Uuid,
        company_id: Uuid,
    ) -> Result<Vec<DirectGrant>, StoreError> {
        self.check()?;
        // Deliberately unfiltered by expiry: the aggregator must not trust the store.
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .filter(|g| g.user_id == user_id && g.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn get_permission_catalog_entry(
        &self,
        name: &PermissionName,
    ) -> Result<Option<Permission>, StoreError> {
        self.check()?;
        Ok(self
            .catalog
            .lock()
            .await
            .iter()
            .find(|p| &p.name == name)
            .cloned())
    }

    async fn list_permission_catalog(&self) -> Result<Vec<Permission>, StoreError> {
        self.check()?;
        Ok(self.catalog.lock().await.clone())
    }
}

pub fn catalog_of(names: &[&str]) -> Arc<PermissionCatalog> {
    Arc::new(PermissionCatalog::from_entries(
        names.iter().map(|n| catalog_entry(n)),
    ))
}

#[derive(Default)]
pub struct RecordingAuditSink {
    pub decisions: std::sync::Mutex<Vec<Decision>>,
}

impl RecordingAuditSink {
    pub fn recorded(&self) -> Vec<Decision> {
        self.decisions
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, decision: &Decision) {
        if let Ok(mut decisions) = self.decisions.lock() {
            decisions.push(decision.clone());
        }
    }
}
