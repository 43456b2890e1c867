use std::sync::Arc;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{AuthzRuntime, RequestGuard};
use crate::config::AuthzConfig;
use crate::db::SqliteRoleGrantStore;
use crate::errors::AppError;
use crate::events::{init_event_bus, start_audit_listener, EventBus, EventBusAuditSink};
use crate::jwt::{JwtConfig, JwtSessionResolver, SessionResolver};
use crate::routes::{authz, health};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub sessions: Arc<dyn SessionResolver>,
    pub authz: AuthzRuntime,
    pub guard: RequestGuard,
    pub event_bus: EventBus,
}

impl AppState {
    /// Builds the authorization runtime over the SQLite store and starts the
    /// audit listener. Fails closed on any configuration error.
    pub async fn initialize(pool: SqlitePool, jwt: JwtConfig, config: &AuthzConfig) -> Result<Self, AppError> {
        let store = Arc::new(SqliteRoleGrantStore::new(pool.clone()));
        let authz = AuthzRuntime::initialize(config, store).await?;

        let (event_bus, audit_rx) = init_event_bus();
        tokio::spawn(start_audit_listener(audit_rx, pool.clone()));

        let jwt = Arc::new(jwt);
        let sessions: Arc<dyn SessionResolver> = Arc::new(JwtSessionResolver::new(jwt.clone()));
        let guard = authz.guard(Arc::new(EventBusAuditSink::new(event_bus.clone())), sessions.clone());

        Ok(Self {
            pool,
            jwt,
            sessions,
            authz,
            guard,
            event_bus,
        })
    }
}

pub async fn create_app(state: AppState) -> Result<Router, AppError> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let authz_routes = authz::routes(&state)?;

    let router = Router::new()
        .route("/api/health", get(health::health))
        .nest("/authz", authz_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
