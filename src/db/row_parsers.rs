use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::authz::PermissionName;
use crate::errors::StoreError;
use crate::models::rbac::{DirectGrant, Permission, RoleAssignment};

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    let s = s.trim();

    // RFC3339 first (e.g. 2025-11-19T12:34:56Z)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite CURRENT_TIMESTAMP: "YYYY-MM-DD HH:MM:SS" (optional fractional seconds)
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| StoreError::Malformed("invalid datetime: date out of range".to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(StoreError::Malformed(format!("invalid datetime: {}", s)))
}

pub fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    s.as_deref().map(parse_datetime).transpose()
}

pub fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s.trim()).map_err(|e| StoreError::Malformed(format!("invalid uuid '{}': {}", s, e)))
}

fn column<T>(row: &SqliteRow, name: &str) -> Result<T, StoreError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Malformed(format!("missing {}: {}", name, e)))
}

pub fn permission_from_row(row: &SqliteRow) -> Result<Permission, StoreError> {
    let name: String = column(row, "name")?;
    let description: Option<String> = column(row, "description")?;
    let category: Option<String> = column(row, "category")?;

    Ok(Permission {
        name: name.parse::<PermissionName>()?,
        description: description.unwrap_or_default(),
        category: category.unwrap_or_else(|| "general".to_string()),
    })
}

pub fn role_assignment_from_row(row: &SqliteRow) -> Result<RoleAssignment, StoreError> {
    let user_id: String = column(row, "user_id")?;
    let role_id: String = column(row, "role_id")?;
    let company_id: Option<String> = column(row, "company_id")?;

    Ok(RoleAssignment {
        user_id: parse_uuid(&user_id)?,
        role_id: parse_uuid(&role_id)?,
        company_id: company_id.as_deref().map(parse_uuid).transpose()?,
    })
}

pub fn direct_grant_from_row(row: &SqliteRow) -> Result<DirectGrant, StoreError> {
    let id: String = column(row, "id")?;
    let user_id: String = column(row, "user_id")?;
    let company_id: String = column(row, "company_id")?;
    let permission: String = column(row, "permission_name")?;
    let granted: bool = column(row, "granted")?;
    let granted_by: Option<String> = column(row, "granted_by")?;
    let granted_at: String = column(row, "granted_at")?;
    let expires_at: Option<String> = column(row, "expires_at")?;
    let is_active: bool = column(row, "is_active")?;

    Ok(DirectGrant {
        id: parse_uuid(&id)?,
        user_id: parse_uuid(&user_id)?,
        company_id: parse_uuid(&company_id)?,
        permission: permission.parse::<PermissionName>()?,
        granted,
        granted_by: granted_by.as_deref().map(parse_uuid).transpose()?,
        granted_at: parse_datetime(&granted_at)?,
        expires_at: parse_opt_datetime(expires_at)?,
        is_active,
    })
}
