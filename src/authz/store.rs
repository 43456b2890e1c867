use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::permission::PermissionName;
use crate::errors::StoreError;
use crate::models::rbac::{DirectGrant, Permission, Role, RoleAssignment};

/// Read-only port over the persistent user/role/grant data.
#[async_trait]
pub trait RoleGrantStore: Send + Sync {
    /// Every role assignment of a user, global and company-scoped.
    async fn get_role_assignments(&self, user_id: Uuid) -> Result<Vec<RoleAssignment>, StoreError>;

    /// Role bundles for the given ids. Unknown ids are omitted.
    async fn get_roles(&self, role_ids: &[Uuid]) -> Result<Vec<Role>, StoreError>;

    /// Direct grants and revocations of a user inside one company.
    async fn get_active_direct_grants(
        &self,
        user_id: Uuid,
        company_id: Uuid,
    ) -> Result<Vec<DirectGrant>, StoreError>;

    async fn get_permission_catalog_entry(
        &self,
        name: &PermissionName,
    ) -> Result<Option<Permission>, StoreError>;

    async fn list_permission_catalog(&self) -> Result<Vec<Permission>, StoreError>;
}

/// Decorator bounding every store query. A timeout surfaces as
/// [`StoreError::Timeout`], which callers treat like an outage.
pub struct TimedStore {
    inner: Arc<dyn RoleGrantStore>,
    timeout: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn RoleGrantStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T>(
        &self,
        query: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, query).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "permission store query timed out");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl RoleGrantStore for TimedStore {
    async fn get_role_assignments(&self, user_id: Uuid) -> Result<Vec<RoleAssignment>, StoreError> {
        self.bounded(self.inner.get_role_assignments(user_id)).await
    }

    async fn get_roles(&self, role_ids: &[Uuid]) -> Result<Vec<Role>, StoreError> {
        self.bounded(self.inner.get_roles(role_ids)).await
    }

    async fn get_active_direct_grants(
        &self,
        user_id: Uuid,
        company_id: Uuid,
    ) -> Result<Vec<DirectGrant>, StoreError> {
        self.bounded(self.inner.get_active_direct_grants(user_id, company_id))
            .await
    }

    async fn get_permission_catalog_entry(
        &self,
        name: &PermissionName,
    ) -> Result<Option<Permission>, StoreError> {
        self.bounded(self.inner.get_permission_catalog_entry(name)).await
    }

    async fn list_permission_catalog(&self) -> Result<Vec<Permission>, StoreError> {
        self.bounded(self.inner.list_permission_catalog()).await
    }
}
