use std::future::Future;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::catalog::PermissionCatalog;
use super::enforcement::{EnforcementController, EnforcementMode};
use super::evaluator::{Decision, PermissionRequirement, PolicyEvaluator};
use super::permission::PermissionName;
use super::principal::{AuthorizationContext, Principal, ResourceContext};
use crate::errors::AppError;
use crate::events::{AuditSink, RequestContext};
use crate::jwt::SessionResolver;

/// What the guard lets happen to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Run the handler. The principal is absent when enforcement is disabled.
    Proceed(Option<Principal>),
    Reject(Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Unauthorized,
    Forbidden,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        // Generic bodies: callers never learn which permission was missing.
        match self {
            Rejection::Unauthorized => AppError::unauthorized("authentication required").into_response(),
            Rejection::Forbidden => AppError::forbidden("insufficient permissions").into_response(),
        }
    }
}

/// Enforces permission requirements at the API boundary.
#[derive(Clone)]
pub struct RequestGuard {
    evaluator: Arc<dyn PolicyEvaluator>,
    controller: Arc<EnforcementController>,
    catalog: Arc<PermissionCatalog>,
    audit: Arc<dyn AuditSink>,
    sessions: Arc<dyn SessionResolver>,
}

impl RequestGuard {
    pub fn new(
        evaluator: Arc<dyn PolicyEvaluator>,
        controller: Arc<EnforcementController>,
        catalog: Arc<PermissionCatalog>,
        audit: Arc<dyn AuditSink>,
        sessions: Arc<dyn SessionResolver>,
    ) -> Self {
        Self {
            evaluator,
            controller,
            catalog,
            audit,
            sessions,
        }
    }

    pub fn mode(&self) -> EnforcementMode {
        self.controller.mode()
    }

    /// Layer state requiring one permission, for use with
    /// `axum::middleware::from_fn_with_state(state, enforce)`.
    pub fn require_permission(&self, permission: &str) -> Result<GuardState, AppError> {
        let permission: PermissionName = permission.parse()?;
        self.warn_if_unseeded(&permission);
        Ok(GuardState {
            guard: self.clone(),
            requirement: Arc::new(PermissionRequirement::single(permission)),
        })
    }

    /// Layer state requiring any one of several permissions.
    pub fn require_any_permission(&self, permissions: &[&str]) -> Result<GuardState, AppError> {
        let permissions = permissions
            .iter()
            .map(|name| name.parse::<PermissionName>())
            .collect::<Result<Vec<_>, _>>()?;
        for permission in &permissions {
            self.warn_if_unseeded(permission);
        }
        Ok(GuardState {
            guard: self.clone(),
            requirement: Arc::new(PermissionRequirement::any_of(permissions)?),
        })
    }

    fn warn_if_unseeded(&self, permission: &PermissionName) {
        if !self.catalog.contains(permission) {
            tracing::warn!(
                permission = %permission,
                "guard requires a permission missing from the catalog; it will always deny"
            );
        }
    }

    /// Decides whether a request may reach its handler.
    pub async fn check(
        &self,
        headers: &HeaderMap,
        resource: Option<&ResourceContext>,
        requirement: &PermissionRequirement,
        request: Option<RequestContext>,
    ) -> GuardOutcome {
        let mode = self.controller.mode();
        if mode == EnforcementMode::Disabled {
            return GuardOutcome::Proceed(None);
        }

        let Some(principal) = self.sessions.resolve(headers).await else {
            tracing::debug!(requirement = %requirement, "no session; rejecting");
            return GuardOutcome::Reject(Rejection::Unauthorized);
        };

        let ctx = AuthorizationContext::from_request(&principal, resource);
        let decision = self.evaluator.evaluate(requirement, &ctx).await;

        if decision.allowed {
            tracing::debug!(
                user_id = %decision.user_id,
                permission = %decision.permission,
                reason = %decision.reason,
                "permission granted"
            );
            return GuardOutcome::Proceed(Some(principal));
        }

        self.audit.record_request(&decision, request);
        match mode {
            EnforcementMode::DryRun => {
                log_denial(&decision, true);
                GuardOutcome::Proceed(Some(principal))
            }
            _ => {
                log_denial(&decision, false);
                GuardOutcome::Reject(Rejection::Forbidden)
            }
        }
    }

    /// Wraps a handler: it runs only if the guard lets the request through.
    pub async fn guard<F, Fut>(
        &self,
        headers: &HeaderMap,
        resource: Option<&ResourceContext>,
        requirement: &PermissionRequirement,
        handler: F,
    ) -> Response
    where
        F: FnOnce(Option<Principal>) -> Fut,
        Fut: Future<Output = Response>,
    {
        match self.check(headers, resource, requirement, None).await {
            GuardOutcome::Proceed(principal) => handler(principal).await,
            GuardOutcome::Reject(rejection) => rejection.into_response(),
        }
    }
}

fn log_denial(decision: &Decision, dry_run: bool) {
    if dry_run {
        tracing::warn!(
            user_id = %decision.user_id,
            permission = %decision.permission,
            reason = %decision.reason,
            roles = ?decision.user_roles,
            "dry-run: request would be denied"
        );
    } else {
        tracing::info!(
            user_id = %decision.user_id,
            permission = %decision.permission,
            reason = %decision.reason,
            "permission denied"
        );
    }
}

/// A guard bound to one requirement; the state of the [`enforce`] middleware.
#[derive(Clone)]
pub struct GuardState {
    guard: RequestGuard,
    requirement: Arc<PermissionRequirement>,
}

/// Route middleware. Reads an optional [`ResourceContext`] from request
/// extensions and, on success, inserts the resolved [`Principal`].
pub async fn enforce(State(state): State<GuardState>, mut request: Request, next: Next) -> Response {
    let resource = request.extensions().get::<ResourceContext>().cloned();
    let context = RequestContext::from_parts(request.method(), request.uri(), request.headers());

    let outcome = state
        .guard
        .check(request.headers(), resource.as_ref(), &state.requirement, Some(context))
        .await;

    match outcome {
        GuardOutcome::Proceed(principal) => {
            if let Some(principal) = principal {
                request.extensions_mut().insert(principal);
            }
            next.run(request).await
        }
        GuardOutcome::Reject(rejection) => rejection.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::authz::aggregator::PermissionAggregator;
    use crate::authz::cache::DecisionCache;
    use crate::authz::evaluator::PermissionEvaluator;
    use crate::authz::testing::{catalog_of, perm, role, FakeStore, RecordingAuditSink};
    use crate::config::AuthzConfig;

    struct FixedSession(Option<Principal>);

    #[async_trait]
    impl SessionResolver for FixedSession {
        async fn resolve(&self, _headers: &HeaderMap) -> Option<Principal> {
            self.0
        }
    }

    struct Harness {
        guard: RequestGuard,
        audit: Arc<RecordingAuditSink>,
        store: Arc<FakeStore>,
        user: Uuid,
    }

    async fn harness(mode: EnforcementMode, signed_in: bool) -> Harness {
        let catalog = catalog_of(&["contract:read:all", "contract:update:own", "booking:read:own"]);
        let store = Arc::new(FakeStore::default());
        let user = Uuid::new_v4();
        let viewer = store.add_role(role("viewer", &["contract:read:all"])).await;
        store.assign(user, viewer, None).await;

        let config = AuthzConfig {
            enforcement: mode,
            ..AuthzConfig::default()
        };
        let controller = Arc::new(EnforcementController::initialize(&config, &catalog).unwrap());
        let evaluator = Arc::new(PermissionEvaluator::new(
            PermissionAggregator::new(store.clone(), catalog.clone()),
            Arc::new(DecisionCache::from_config(&config)),
        ));
        let audit = Arc::new(RecordingAuditSink::default());
        let session = FixedSession(signed_in.then(|| Principal::new(user)));

        Harness {
            guard: RequestGuard::new(evaluator, controller, catalog, audit.clone(), Arc::new(session)),
            audit,
            store,
            user,
        }
    }

    async fn run(guard: &RequestGuard, permission: &str) -> (StatusCode, bool) {
        let requirement = PermissionRequirement::single(perm(permission));
        let ran = AtomicBool::new(false);
        let flag = &ran;
        let response = guard
            .guard(&HeaderMap::new(), None, &requirement, move |_| async move {
                flag.store(true, Ordering::SeqCst);
                "handled".into_response()
            })
            .await;
        (response.status(), ran.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn enforce_blocks_denied_requests() {
        let h = harness(EnforcementMode::Enforce, true).await;
        let (status, ran) = run(&h.guard, "contract:update:own").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!ran);

        let recorded = h.audit.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].user_id, h.user);
        assert!(!recorded[0].allowed);
    }

    #[tokio::test]
    async fn enforce_runs_allowed_requests_without_auditing() {
        let h = harness(EnforcementMode::Enforce, true).await;
        let (status, ran) = run(&h.guard, "contract:read:all").await;
        assert_eq!(status, StatusCode::OK);
        assert!(ran);
        assert!(h.audit.recorded().is_empty());
    }

    #[tokio::test]
    async fn dry_run_passes_denied_requests_through() {
        let h = harness(EnforcementMode::DryRun, true).await;
        let (status, ran) = run(&h.guard, "contract:update:own").await;
        assert_eq!(status, StatusCode::OK);
        assert!(ran);
        assert_eq!(h.audit.recorded().len(), 1);
    }

    #[tokio::test]
    async fn disabled_skips_sessions_and_evaluation() {
        let h = harness(EnforcementMode::Disabled, false).await;
        let (status, ran) = run(&h.guard, "contract:update:own").await;
        assert_eq!(status, StatusCode::OK);
        assert!(ran);
        assert_eq!(h.store.assignment_calls(), 0);
    }

    #[tokio::test]
    async fn missing_session_is_unauthorized() {
        for mode in [EnforcementMode::Enforce, EnforcementMode::DryRun] {
            let h = harness(mode, false).await;
            let (status, ran) = run(&h.guard, "contract:read:all").await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert!(!ran);
            assert_eq!(h.store.assignment_calls(), 0);
        }
    }

    #[tokio::test]
    async fn store_outage_is_forbidden_when_enforcing() {
        let h = harness(EnforcementMode::Enforce, true).await;
        h.store.set_unavailable(true);
        let (status, ran) = run(&h.guard, "contract:read:all").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!ran);
    }

    #[tokio::test]
    async fn middleware_uses_resource_context_from_extensions() {
        let h = harness(EnforcementMode::Enforce, true).await;
        let owner = h.user;
        let state = h.guard.require_any_permission(&["booking:read:own", "contract:update:own"]).unwrap();

        let app = Router::new()
            .route("/contracts/:id", get(|| async { "contract" }))
            .route_layer(axum::middleware::from_fn_with_state(state, enforce))
            .layer(axum::middleware::from_fn(
                move |mut request: Request, next: Next| async move {
                    request
                        .extensions_mut()
                        .insert(ResourceContext::new().with_owner(owner));
                    next.run(request).await
                },
            ));

        // The viewer role lacks both permissions.
        let response = app
            .oneshot(HttpRequest::get("/contracts/1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let editor = h.store.add_role(role("editor", &["contract:update:own"])).await;
        h.store.assign(h.user, editor, None).await;
        h.guard.evaluator.invalidate_user(h.user).await;

        let state = h.guard.require_permission("contract:update:own").unwrap();
        let app = Router::new()
            .route("/contracts/:id", get(|| async { "contract" }))
            .route_layer(axum::middleware::from_fn_with_state(state, enforce))
            .layer(axum::middleware::from_fn(
                move |mut request: Request, next: Next| async move {
                    request
                        .extensions_mut()
                        .insert(ResourceContext::new().with_owner(owner));
                    next.run(request).await
                },
            ));
        let response = app
            .oneshot(HttpRequest::get("/contracts/1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_guard_permissions_are_rejected() {
        let h = harness(EnforcementMode::Enforce, true).await;
        let malformed = "contract.read";
        assert!(h.guard.require_permission(malformed).is_err());
        assert!(h.guard.require_any_permission(&[]).is_err());
    }
}
