//! Authorization admin API
//!
//! Read-only views of effective permissions plus the manual cache
//! invalidation path used right after roles or grants change.

use axum::extract::{Path, Query, State};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{enforce, PolicyEvaluator, Principal};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::rbac::EffectivePermissionsResponse;

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes(state: &AppState) -> Result<Router<AppState>, AppError> {
    let read_state = state.guard.require_permission("rbac:read:all")?;
    let manage_state = state
        .guard
        .require_any_permission(&["rbac:manage:all", "user:manage:all"])?;

    let read_routes = Router::new()
        .route("/users/:user_id/effective-permissions", get(get_effective_permissions))
        .route_layer(from_fn_with_state(read_state, enforce));

    let manage_routes = Router::new()
        .route("/users/:user_id/cache/invalidate", post(invalidate_user_cache))
        .route_layer(from_fn_with_state(manage_state, enforce));

    Ok(Router::new()
        .route("/me", get(get_my_permissions))
        .merge(read_routes)
        .merge(manage_routes))
}

#[derive(Debug, Deserialize)]
pub struct CompanyQuery {
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct InvalidateCacheResponse {
    pub user_id: Uuid,
    pub removed_entries: usize,
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Effective permissions of the caller inside the session's company.
async fn get_my_permissions(
    State(state): State<AppState>,
    AuthUser(principal): AuthUser,
) -> AppResult<Json<EffectivePermissionsResponse>> {
    let set = state
        .authz
        .evaluator
        .effective_permissions(principal.user_id, principal.company_id)
        .await?;
    Ok(Json(set.into()))
}

async fn get_effective_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<CompanyQuery>,
) -> AppResult<Json<EffectivePermissionsResponse>> {
    let set = state
        .authz
        .evaluator
        .effective_permissions(user_id, query.company_id)
        .await?;
    Ok(Json(set.into()))
}

async fn invalidate_user_cache(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    actor: Option<Extension<Principal>>,
) -> AppResult<Json<InvalidateCacheResponse>> {
    let removed_entries = state.authz.evaluator.invalidate_user(user_id).await;

    tracing::info!(
        actor_id = ?actor.map(|Extension(principal)| principal.user_id),
        user_id = %user_id,
        removed_entries,
        "permission cache invalidated via admin API"
    );

    Ok(Json(InvalidateCacheResponse {
        user_id,
        removed_entries,
    }))
}
