#![allow(dead_code)]

use std::path::Path;

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`
use uuid::Uuid;

use rbac_core::config::AuthzConfig;
use rbac_core::jwt::JwtConfig;
use rbac_core::{create_app, AppState};

pub const ADMIN_ROLE: &str = "00000000-0000-4000-8000-00000000a001";
pub const MANAGER_ROLE: &str = "00000000-0000-4000-8000-00000000a002";
pub const CLIENT_ROLE: &str = "00000000-0000-4000-8000-00000000a004";
pub const VIEWER_ROLE: &str = "00000000-0000-4000-8000-00000000a006";

pub struct TestApp {
    // Keeps the database file alive for the duration of the test.
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub state: AppState,
    pub router: Router,
}

/// Fresh SQLite file with schema and catalog seed applied.
pub async fn seeded_pool() -> Result<(TempDir, SqlitePool)> {
    let dir = tempfile::tempdir()?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    Ok((dir, pool))
}

pub async fn spawn_app(config: AuthzConfig) -> Result<TestApp> {
    let (dir, pool) = seeded_pool().await?;
    let state = AppState::initialize(pool.clone(), JwtConfig::new("test-secret", 1), &config).await?;
    let router = create_app(state.clone()).await?;
    Ok(TestApp {
        dir,
        pool,
        state,
        router,
    })
}

impl TestApp {
    pub fn token(&self, user_id: Uuid, company_id: Option<Uuid>) -> Result<String> {
        Ok(self.state.jwt.encode(user_id, company_id)?)
    }

    pub async fn send(&self, method: &str, uri: &str, token: Option<&str>) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let resp = self.router.clone().oneshot(builder.body(Body::empty())?).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), 1_048_576).await?;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        Ok((status, json))
    }
}

pub async fn assign_role(pool: &SqlitePool, user_id: Uuid, role_id: &str, company_id: Option<Uuid>) -> Result<()> {
    sqlx::query("INSERT INTO user_roles (id, user_id, role_id, company_id) VALUES (?, ?, ?, ?)")
        .bind(Uuid::new_v4().to_string())
        .bind(user_id.to_string())
        .bind(role_id)
        .bind(company_id.map(|c| c.to_string()))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_grant(
    pool: &SqlitePool,
    user_id: Uuid,
    company_id: Uuid,
    permission: &str,
    granted: bool,
    expires_at: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO user_permission_grants (id, user_id, company_id, permission_name, granted, expires_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id.to_string())
    .bind(company_id.to_string())
    .bind(permission)
    .bind(granted)
    .bind(expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub fn names(value: &Value, field: &str) -> Vec<String> {
    value
        .get(field)
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|i| i.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}
