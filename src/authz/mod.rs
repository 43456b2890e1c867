//! Authorization module - permission evaluation and enforcement
//!
//! This module implements the RBAC core:
//! - `resource:action:scope` permission names with scope subsumption
//! - Role and direct-grant aggregation with revocations
//! - A shared TTL decision cache with per-user invalidation
//! - A request guard driven by a process-wide enforcement mode

mod aggregator;
mod cache;
mod catalog;
mod enforcement;
mod evaluator;
mod guard;
mod permission;
mod principal;
mod resolver;
mod store;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

pub use aggregator::{EffectivePermissionSet, PermissionAggregator, IMPLICIT_DEFAULT_ROLE};
pub use cache::{DecisionCache, DecisionKey, Generation};
pub use catalog::PermissionCatalog;
pub use enforcement::{ControllerState, EnforcementController, EnforcementMode, RuntimeEnvironment};
pub use evaluator::{decide, Decision, DecisionReason, PermissionEvaluator, PermissionRequirement, PolicyEvaluator};
pub use guard::{enforce, GuardOutcome, GuardState, Rejection, RequestGuard};
pub use permission::{scope_satisfies, PermissionName, PermissionParseError, Scope};
pub use principal::{AuthorizationContext, Principal, ResourceContext};
pub use resolver::RoleResolver;
pub use store::{RoleGrantStore, TimedStore};

pub use crate::events::AuditSink;

use crate::config::AuthzConfig;
use crate::errors::AppError;
use crate::jwt::SessionResolver;

/// Well-known role names
pub mod roles {
    /// Implicitly holds the whole catalog.
    pub const ADMIN: &str = "admin";
    pub const MANAGER: &str = "manager";
    pub const PROVIDER: &str = "provider";
    pub const CLIENT: &str = "client";
    pub const USER: &str = "user";
    pub const VIEWER: &str = "viewer";
}

/// Process-wide authorization objects, built once at startup.
#[derive(Clone)]
pub struct AuthzRuntime {
    pub catalog: Arc<PermissionCatalog>,
    pub controller: Arc<EnforcementController>,
    pub cache: Arc<DecisionCache>,
    pub evaluator: Arc<PermissionEvaluator>,
}

impl AuthzRuntime {
    /// Loads the catalog and validates the enforcement mode. Any error here
    /// must stop the process before it serves traffic.
    pub async fn initialize(config: &AuthzConfig, store: Arc<dyn RoleGrantStore>) -> Result<Self, AppError> {
        let store: Arc<dyn RoleGrantStore> = Arc::new(TimedStore::new(store, config.store_timeout));

        let catalog = Arc::new(PermissionCatalog::load(store.as_ref()).await?);
        let controller = Arc::new(EnforcementController::initialize(config, &catalog)?);
        let cache = Arc::new(DecisionCache::from_config(config));
        let evaluator = Arc::new(PermissionEvaluator::new(
            PermissionAggregator::new(store, catalog.clone()),
            cache.clone(),
        ));

        tracing::info!(
            mode = %controller.mode(),
            cache_ttl_secs = cache.ttl().as_secs(),
            "authorization runtime initialized"
        );

        Ok(Self {
            catalog,
            controller,
            cache,
            evaluator,
        })
    }

    pub fn guard(&self, audit: Arc<dyn AuditSink>, sessions: Arc<dyn SessionResolver>) -> RequestGuard {
        RequestGuard::new(
            self.evaluator.clone(),
            self.controller.clone(),
            self.catalog.clone(),
            audit,
            sessions,
        )
    }

    pub fn mode(&self) -> EnforcementMode {
        self.controller.mode()
    }

    /// Drops every cached decision. Called on graceful shutdown.
    pub async fn shutdown(&self) {
        let entries = self.cache.len().await;
        self.cache.clear().await;
        tracing::info!(entries, "authorization runtime shut down; cache cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::testing::{catalog_entry, perm, role, FakeStore};

    async fn seeded_store() -> Arc<FakeStore> {
        let store = Arc::new(FakeStore::default());
        store
            .catalog
            .lock()
            .await
            .extend([catalog_entry("contract:read:all"), catalog_entry("contract:read:own")]);
        store
    }

    #[tokio::test]
    async fn initialize_rejects_an_empty_catalog() {
        let result = AuthzRuntime::initialize(&AuthzConfig::default(), Arc::new(FakeStore::default())).await;
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[tokio::test]
    async fn initialize_rejects_relaxed_production() {
        let config = AuthzConfig {
            environment: RuntimeEnvironment::Production,
            enforcement: EnforcementMode::DryRun,
            ..AuthzConfig::default()
        };
        let result = AuthzRuntime::initialize(&config, seeded_store().await).await;
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }

    #[tokio::test]
    async fn shutdown_clears_cached_decisions() {
        let store = seeded_store().await;
        let user = uuid::Uuid::new_v4();
        let viewer = store.add_role(role("viewer", &["contract:read:all"])).await;
        store.assign(user, viewer, None).await;

        let runtime = AuthzRuntime::initialize(&AuthzConfig::default(), store).await.unwrap();
        assert_eq!(runtime.catalog.len(), 2);

        let decision = runtime
            .evaluator
            .evaluate(
                &PermissionRequirement::single(perm("contract:read:all")),
                &AuthorizationContext::for_user(user),
            )
            .await;
        assert!(decision.allowed);
        assert!(!runtime.cache.is_empty().await);

        runtime.shutdown().await;
        assert!(runtime.cache.is_empty().await);
    }
}
