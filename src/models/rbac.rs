use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authz::PermissionName;

// =============================================================================
// PERMISSION (catalog entry)
// =============================================================================

/// Immutable catalog entry, created by seeding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub name: PermissionName,
    pub description: String,
    /// Grouping used by admin screens, e.g. "contracts" or "administration".
    pub category: String,
}

impl Permission {
    pub fn resource(&self) -> &str {
        self.name.resource()
    }

    pub fn action(&self) -> &str {
        self.name.action()
    }
}

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub permissions: BTreeSet<PermissionName>,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        self.name == crate::authz::roles::ADMIN
    }
}

// =============================================================================
// USER-ROLE ASSIGNMENT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user_id: Uuid,
    pub role_id: Uuid,
    /// `None` is a global assignment.
    pub company_id: Option<Uuid>,
}

impl RoleAssignment {
    pub fn is_global(&self) -> bool {
        self.company_id.is_none()
    }

    /// Global assignments apply everywhere; company ones only inside their company.
    pub fn applies_to(&self, company_id: Option<Uuid>) -> bool {
        match self.company_id {
            None => true,
            Some(own) => company_id == Some(own),
        }
    }
}

// =============================================================================
// USER-PERMISSION DIRECT GRANT
// =============================================================================

/// A permission granted (or, with `granted = false`, revoked) outside of roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectGrant {
    pub id: Uuid,
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub permission: PermissionName,
    pub granted: bool,
    pub granted_by: Option<Uuid>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl DirectGrant {
    /// Inactive or expired grants are inert, whatever their `granted` value.
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |expires_at| expires_at > now)
    }

    pub fn is_revocation(&self) -> bool {
        !self.granted
    }
}

// =============================================================================
// EFFECTIVE PERMISSIONS (computed)
// =============================================================================

#[derive(Debug, Serialize)]
pub struct EffectivePermissionsResponse {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<Uuid>,
    pub roles: Vec<String>,
    pub permissions: Vec<PermissionName>,
    pub revoked: Vec<PermissionName>,
}
