use std::sync::Arc;

use uuid::Uuid;

use super::store::RoleGrantStore;
use crate::errors::StoreError;
use crate::models::rbac::RoleAssignment;

/// Resolves the role assignments currently held by a user.
#[derive(Clone)]
pub struct RoleResolver {
    store: Arc<dyn RoleGrantStore>,
}

impl RoleResolver {
    pub fn new(store: Arc<dyn RoleGrantStore>) -> Self {
        Self { store }
    }

    /// Assignments ordered global first, then company-scoped.
    ///
    /// An empty list means the user falls back to the implicit default role,
    /// which grants nothing. Store failures are returned as errors and never
    /// collapse into an empty list.
    pub async fn resolve(&self, user_id: Uuid) -> Result<Vec<RoleAssignment>, StoreError> {
        let mut assignments = self.store.get_role_assignments(user_id).await?;
        // Stable: keeps store order inside each group.
        assignments.sort_by_key(|assignment| !assignment.is_global());

        if assignments.is_empty() {
            tracing::debug!(user_id = %user_id, "no role assignments; using implicit default role");
        }

        Ok(assignments)
    }
}
