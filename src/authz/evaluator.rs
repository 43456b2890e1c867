use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::aggregator::{EffectivePermissionSet, PermissionAggregator};
use super::cache::{DecisionCache, DecisionKey, Generation};
use super::permission::{PermissionName, Scope};
use super::principal::AuthorizationContext;
use crate::errors::{AppError, StoreError};
use crate::events::{Loggable, Severity};

/// Why a decision came out the way it did. Internal only; never sent to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    ScopeAll,
    ScopeOrganization,
    ScopeProvider,
    ScopeOwn,
    PermissionDenied,
    InsufficientContext,
    EvaluationError,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::ScopeAll => "scope_all",
            DecisionReason::ScopeOrganization => "scope_organization",
            DecisionReason::ScopeProvider => "scope_provider",
            DecisionReason::ScopeOwn => "scope_own",
            DecisionReason::PermissionDenied => "permission_denied",
            DecisionReason::InsufficientContext => "insufficient_context",
            DecisionReason::EvaluationError => "evaluation_error",
        }
    }

    fn granted_by(scope: Scope) -> Self {
        match scope {
            Scope::All => DecisionReason::ScopeAll,
            Scope::Organization => DecisionReason::ScopeOrganization,
            Scope::Provider => DecisionReason::ScopeProvider,
            Scope::Own => DecisionReason::ScopeOwn,
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a guarded operation needs: one permission, or any one of several.
///
/// Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequirement {
    first: PermissionName,
    alternatives: Vec<PermissionName>,
    any_of: bool,
}

impl PermissionRequirement {
    pub fn single(permission: PermissionName) -> Self {
        Self {
            first: permission,
            alternatives: Vec::new(),
            any_of: false,
        }
    }

    pub fn any_of(permissions: Vec<PermissionName>) -> Result<Self, AppError> {
        let mut permissions = permissions.into_iter();
        let first = permissions
            .next()
            .ok_or_else(|| AppError::bad_request("any-of requirement needs at least one permission"))?;
        Ok(Self {
            first,
            alternatives: permissions.collect(),
            any_of: true,
        })
    }

    /// The first listed permission.
    pub fn primary(&self) -> &PermissionName {
        &self.first
    }

    pub fn permissions(&self) -> Vec<PermissionName> {
        std::iter::once(self.first.clone())
            .chain(self.alternatives.iter().cloned())
            .collect()
    }

    /// Order-independent key for the decision cache.
    pub fn cache_key(&self) -> String {
        let mut names: Vec<String> = self.permissions().iter().map(ToString::to_string).collect();
        names.sort();
        names.dedup();
        names.join("|")
    }
}

impl fmt::Display for PermissionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.any_of {
            write!(f, "any of [{}]", self.cache_key())
        } else {
            write!(f, "{}", self.first)
        }
    }
}

/// Outcome of one evaluation. Audit material; not the system of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: DecisionReason,
    /// The requested permission this decision is about: the one that matched
    /// on allow, the first requested otherwise.
    pub permission: PermissionName,
    /// Held permission that satisfied the request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_permission: Option<PermissionName>,
    pub requested: Vec<PermissionName>,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<Uuid>,
    pub user_roles: Vec<String>,
    pub user_permissions: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl Decision {
    pub fn resource(&self) -> &str {
        self.permission.resource()
    }

    pub fn action(&self) -> &str {
        self.permission.action()
    }

    pub fn scope(&self) -> Scope {
        self.permission.scope()
    }

    fn evaluation_error(
        requirement: &PermissionRequirement,
        ctx: &AuthorizationContext,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            allowed: false,
            reason: DecisionReason::EvaluationError,
            permission: requirement.primary().clone(),
            matched_permission: None,
            requested: requirement.permissions(),
            user_id: ctx.user_id,
            company_id: ctx.company_id,
            user_roles: Vec::new(),
            user_permissions: Vec::new(),
            evaluated_at: now,
        }
    }
}

impl Loggable for Decision {
    fn entity_type() -> &'static str {
        "authz"
    }

    fn subject_id(&self) -> Uuid {
        self.user_id
    }

    fn severity(&self) -> Severity {
        if self.allowed {
            Severity::Noise
        } else {
            Severity::Critical
        }
    }
}

enum ContextCheck {
    Satisfied,
    Missing,
    Mismatch,
}

/// Whether the request context lets a held permission of `scope` apply.
fn check_scope_context(scope: Scope, ctx: &AuthorizationContext) -> ContextCheck {
    match scope {
        Scope::All => ContextCheck::Satisfied,
        Scope::Organization | Scope::Provider => match (ctx.company_id, ctx.resource_company()) {
            (Some(user_company), Some(resource_company)) if user_company == resource_company => {
                ContextCheck::Satisfied
            }
            (Some(_), Some(_)) => ContextCheck::Mismatch,
            _ => ContextCheck::Missing,
        },
        Scope::Own => match ctx.target_resource_owner_id {
            Some(owner) if owner == ctx.user_id => ContextCheck::Satisfied,
            Some(_) => ContextCheck::Mismatch,
            None => ContextCheck::Missing,
        },
    }
}

enum PermissionCheck {
    Allowed(PermissionName, DecisionReason),
    MissingContext,
    Denied,
}

fn check_permission(
    requested: &PermissionName,
    set: &EffectivePermissionSet,
    ctx: &AuthorizationContext,
) -> PermissionCheck {
    let mut missing_context = false;
    for held in set.satisfying(requested) {
        match check_scope_context(held.scope(), ctx) {
            ContextCheck::Satisfied => {
                return PermissionCheck::Allowed(held.clone(), DecisionReason::granted_by(held.scope()))
            }
            ContextCheck::Missing => missing_context = true,
            ContextCheck::Mismatch => {}
        }
    }
    if missing_context {
        PermissionCheck::MissingContext
    } else {
        PermissionCheck::Denied
    }
}

/// Pure decision over an already aggregated permission set.
pub fn decide(
    requirement: &PermissionRequirement,
    set: &EffectivePermissionSet,
    ctx: &AuthorizationContext,
    now: DateTime<Utc>,
) -> Decision {
    let requested = requirement.permissions();
    let mut missing_context = false;
    let mut outcome = None;

    for permission in &requested {
        match check_permission(permission, set, ctx) {
            PermissionCheck::Allowed(matched, reason) => {
                outcome = Some((permission.clone(), Some(matched), reason));
                break;
            }
            PermissionCheck::MissingContext => missing_context = true,
            PermissionCheck::Denied => {}
        }
    }

    let (permission, matched_permission, reason) = outcome.unwrap_or_else(|| {
        let reason = if missing_context {
            DecisionReason::InsufficientContext
        } else {
            DecisionReason::PermissionDenied
        };
        (requirement.primary().clone(), None, reason)
    });

    Decision {
        allowed: matched_permission.is_some(),
        reason,
        permission,
        matched_permission,
        requested,
        user_id: ctx.user_id,
        company_id: ctx.company_id,
        user_roles: set.role_names(),
        user_permissions: set.permission_names(),
        evaluated_at: now,
    }
}

/// Policy evaluator seam used by the guard and the admin routes.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Never fails: store errors become `evaluation_error` denials.
    async fn evaluate(&self, requirement: &PermissionRequirement, ctx: &AuthorizationContext) -> Decision;

    async fn effective_permissions(
        &self,
        user_id: Uuid,
        company_id: Option<Uuid>,
    ) -> Result<EffectivePermissionSet, StoreError>;

    /// Drops cached decisions and permission sets for one user.
    async fn invalidate_user(&self, user_id: Uuid) -> usize;
}

/// Default evaluator: cache first, then the aggregator.
pub struct PermissionEvaluator {
    aggregator: PermissionAggregator,
    cache: Arc<DecisionCache>,
}

impl PermissionEvaluator {
    pub fn new(aggregator: PermissionAggregator, cache: Arc<DecisionCache>) -> Self {
        Self { aggregator, cache }
    }

    pub fn cache(&self) -> &Arc<DecisionCache> {
        &self.cache
    }

    async fn permissions_for(
        &self,
        user_id: Uuid,
        company_id: Option<Uuid>,
        generation: Generation,
    ) -> Result<EffectivePermissionSet, StoreError> {
        if let Some(set) = self.cache.get_permissions(user_id, company_id).await {
            return Ok(set);
        }
        let set = self.aggregator.aggregate(user_id, company_id).await?;
        self.cache.put_permissions(set.clone(), generation).await;
        Ok(set)
    }
}

#[async_trait]
impl PolicyEvaluator for PermissionEvaluator {
    async fn evaluate(&self, requirement: &PermissionRequirement, ctx: &AuthorizationContext) -> Decision {
        let key = DecisionKey {
            user_id: ctx.user_id,
            company_id: ctx.company_id,
            requirement: requirement.cache_key(),
            context: ctx.fingerprint(),
        };
        if let Some(decision) = self.cache.get_decision(&key).await {
            return decision;
        }

        let generation = self.cache.generation().await;
        let set = match self.permissions_for(ctx.user_id, ctx.company_id, generation).await {
            Ok(set) => set,
            Err(err) => {
                tracing::warn!(
                    user_id = %ctx.user_id,
                    requirement = %requirement,
                    error = %err,
                    "permission store failed; denying"
                );
                // Errors are never cached so the next request retries the store.
                return Decision::evaluation_error(requirement, ctx, Utc::now());
            }
        };

        let decision = decide(requirement, &set, ctx, Utc::now());
        self.cache.put_decision(key, decision.clone(), generation).await;
        decision
    }

    async fn effective_permissions(
        &self,
        user_id: Uuid,
        company_id: Option<Uuid>,
    ) -> Result<EffectivePermissionSet, StoreError> {
        let generation = self.cache.generation().await;
        self.permissions_for(user_id, company_id, generation).await
    }

    async fn invalidate_user(&self, user_id: Uuid) -> usize {
        self.cache.invalidate_user(user_id).await
    }
}
