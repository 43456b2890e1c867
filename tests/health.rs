mod common;

use anyhow::Result;
use axum::http::StatusCode;

use rbac_core::authz::EnforcementMode;
use rbac_core::config::AuthzConfig;

#[tokio::test]
async fn health_endpoint_reports_db_and_enforcement() -> Result<()> {
    let app = common::spawn_app(AuthzConfig::default()).await?;

    let (status, v) = app.send("GET", "/api/health", None).await?;
    assert_eq!(status, StatusCode::OK, "health endpoint did not return 200");

    assert_eq!(v["db_ok"].as_bool(), Some(true), "expected db_ok: true, got: {}", v);
    assert_eq!(v["enforcement_mode"], "enforce");
    assert_eq!(v["catalog_size"].as_u64(), Some(app.state.authz.catalog.len() as u64));
    assert!(app.state.authz.catalog.len() > 40);

    Ok(())
}

#[tokio::test]
async fn health_reflects_dry_run_mode() -> Result<()> {
    let config = AuthzConfig {
        enforcement: EnforcementMode::DryRun,
        ..AuthzConfig::default()
    };
    let app = common::spawn_app(config).await?;

    let (status, v) = app.send("GET", "/api/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["enforcement_mode"], "dry-run");

    Ok(())
}
