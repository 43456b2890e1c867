use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The authenticated caller, as resolved from the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    /// Company the session is acting in, if any.
    pub company_id: Option<Uuid>,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            company_id: None,
        }
    }

    pub fn with_company(mut self, company_id: Uuid) -> Self {
        self.company_id = Some(company_id);
        self
    }
}

/// Facts about the resource a request targets.
///
/// Handlers or upstream layers put this into request extensions; the guard
/// reads it when building the [`AuthorizationContext`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceContext {
    pub resource_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
}

impl ResourceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(mut self, owner_id: Uuid) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn with_company(mut self, company_id: Uuid) -> Self {
        self.company_id = Some(company_id);
        self
    }
}

/// Per-request input to the evaluator. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationContext {
    pub user_id: Uuid,
    pub company_id: Option<Uuid>,
    pub target_resource_id: Option<Uuid>,
    pub target_resource_owner_id: Option<Uuid>,
    /// Company owning the target. When absent, the target is taken to live in
    /// `company_id`.
    pub target_resource_company_id: Option<Uuid>,
}

impl AuthorizationContext {
    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }

    pub fn from_request(principal: &Principal, resource: Option<&ResourceContext>) -> Self {
        let resource = resource.cloned().unwrap_or_default();
        Self {
            user_id: principal.user_id,
            company_id: principal.company_id,
            target_resource_id: resource.resource_id,
            target_resource_owner_id: resource.owner_id,
            target_resource_company_id: resource.company_id,
        }
    }

    pub fn in_company(mut self, company_id: Uuid) -> Self {
        self.company_id = Some(company_id);
        self
    }

    pub fn owned_by(mut self, owner_id: Uuid) -> Self {
        self.target_resource_owner_id = Some(owner_id);
        self
    }

    pub fn target_in_company(mut self, company_id: Uuid) -> Self {
        self.target_resource_company_id = Some(company_id);
        self
    }

    /// Company the target belongs to, defaulting to the acting company.
    pub fn resource_company(&self) -> Option<Uuid> {
        self.target_resource_company_id.or(self.company_id)
    }

    /// Stable string of the target fields, used in cache keys.
    pub fn fingerprint(&self) -> String {
        fn part(value: Option<Uuid>) -> String {
            value.map(|v| v.to_string()).unwrap_or_default()
        }
        format!(
            "{}|{}|{}",
            part(self.target_resource_id),
            part(self.target_resource_owner_id),
            part(self.target_resource_company_id)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_context_merges_session_and_resource() {
        let user = Uuid::new_v4();
        let company = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let principal = Principal::new(user).with_company(company);
        let resource = ResourceContext::new().with_owner(owner);

        let ctx = AuthorizationContext::from_request(&principal, Some(&resource));
        assert_eq!(ctx.user_id, user);
        assert_eq!(ctx.company_id, Some(company));
        assert_eq!(ctx.target_resource_owner_id, Some(owner));
        assert_eq!(ctx.resource_company(), Some(company));
    }

    #[test]
    fn fingerprint_distinguishes_targets() {
        let user = Uuid::new_v4();
        let a = AuthorizationContext::for_user(user).owned_by(Uuid::new_v4());
        let b = AuthorizationContext::for_user(user).owned_by(Uuid::new_v4());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(
            AuthorizationContext::for_user(user).fingerprint(),
            AuthorizationContext::for_user(user).fingerprint()
        );
    }
}
