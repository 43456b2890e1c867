use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::row_parsers::{
    direct_grant_from_row, parse_uuid, permission_from_row, role_assignment_from_row,
};
use crate::authz::{PermissionName, RoleGrantStore};
use crate::errors::StoreError;
use crate::models::rbac::{DirectGrant, Permission, Role, RoleAssignment};

/// SQLite implementation of the role/grant store. Ids are stored as text.
#[derive(Clone)]
pub struct SqliteRoleGrantStore {
    pool: SqlitePool,
}

impl SqliteRoleGrantStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleGrantStore for SqliteRoleGrantStore {
    async fn get_role_assignments(&self, user_id: Uuid) -> Result<Vec<RoleAssignment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, role_id, company_id
            FROM user_roles
            WHERE user_id = ?
            ORDER BY company_id IS NOT NULL, created_at
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(role_assignment_from_row).collect()
    }

    async fn get_roles(&self, role_ids: &[Uuid]) -> Result<Vec<Role>, StoreError> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; role_ids.len()].join(", ");
        let sql = format!(
            r#"
            SELECT r.id, r.name, rp.permission_name
            FROM roles r
            LEFT JOIN role_permissions rp ON rp.role_id = r.id
            WHERE r.id IN ({placeholders})
            ORDER BY r.name, rp.permission_name
            "#
        );

        let mut query = sqlx::query(&sql);
        for id in role_ids {
            query = query.bind(id.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut roles: Vec<Role> = Vec::new();
        for row in &rows {
            let id = parse_uuid(row.try_get::<&str, _>("id")?)?;
            let permission: Option<String> = row.try_get("permission_name")?;

            let index = match roles.iter().position(|role| role.id == id) {
                Some(index) => index,
                None => {
                    roles.push(Role {
                        id,
                        name: row.try_get("name")?,
                        permissions: BTreeSet::new(),
                    });
                    roles.len() - 1
                }
            };
            if let Some(permission) = permission {
                roles[index].permissions.insert(permission.parse::<PermissionName>()?);
            }
        }

        Ok(roles)
    }

    async fn get_active_direct_grants(
        &self,
        user_id: Uuid,
        company_id: Uuid,
    ) -> Result<Vec<DirectGrant>, StoreError> {
        // Expiry is checked by the aggregator against a parsed timestamp;
        // stored formats vary too much for a text comparison here.
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, company_id, permission_name, granted, granted_by,
                   granted_at, expires_at, is_active
            FROM user_permission_grants
            WHERE user_id = ? AND company_id = ? AND is_active = 1
            ORDER BY granted_at
            "#,
        )
        .bind(user_id.to_string())
        .bind(company_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(direct_grant_from_row).collect()
    }

    async fn get_permission_catalog_entry(
        &self,
        name: &PermissionName,
    ) -> Result<Option<Permission>, StoreError> {
        let row = sqlx::query("SELECT name, description, category FROM permissions WHERE name = ?")
            .bind(name.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(permission_from_row).transpose()
    }

    async fn list_permission_catalog(&self) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query("SELECT name, description, category FROM permissions ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(permission_from_row).collect()
    }
}
