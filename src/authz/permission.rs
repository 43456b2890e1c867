//! Typed `resource:action:scope` permission names.
//!
//! Permission strings are parsed once at the load boundary (catalog, store rows,
//! guard construction) so evaluation only ever compares validated values.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Breadth of a permission grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Only resources owned by the user.
    Own,
    /// Resources belonging to the user's company.
    Organization,
    /// Resources belonging to the user's provider company.
    Provider,
    /// Every resource, regardless of owner or tenant.
    All,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Own => "own",
            Scope::Organization => "organization",
            Scope::Provider => "provider",
            Scope::All => "all",
        }
    }

    /// Breadth rank: own < organization = provider < all.
    pub fn rank(&self) -> u8 {
        match self {
            Scope::Own => 0,
            Scope::Organization | Scope::Provider => 1,
            Scope::All => 2,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = PermissionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "own" => Ok(Scope::Own),
            "organization" => Ok(Scope::Organization),
            "provider" => Ok(Scope::Provider),
            "all" => Ok(Scope::All),
            other => Err(PermissionParseError::UnknownScope(other.to_string())),
        }
    }
}

/// Returns whether a grant held at `held` scope can satisfy a request for `requested` scope.
///
/// This is the single source of truth for scope subsumption. Whether the
/// request context actually confirms ownership or tenancy is a separate check
/// done by the evaluator.
pub fn scope_satisfies(held: Scope, requested: Scope) -> bool {
    match held {
        Scope::All => true,
        Scope::Organization => matches!(requested, Scope::Own | Scope::Organization),
        Scope::Provider => matches!(requested, Scope::Own | Scope::Provider),
        Scope::Own => requested == Scope::Own,
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PermissionParseError {
    #[error("permission '{0}' must have the shape resource:action:scope")]
    Shape(String),
    #[error("permission segment '{0}' must be lowercase ascii, digits, '_' or '-'")]
    InvalidSegment(String),
    #[error("unknown permission scope '{0}'")]
    UnknownScope(String),
}

/// A validated `resource:action:scope` permission name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionName {
    resource: String,
    action: String,
    scope: Scope,
}

impl PermissionName {
    pub fn new(resource: &str, action: &str, scope: Scope) -> Result<Self, PermissionParseError> {
        validate_segment(resource)?;
        validate_segment(action)?;
        Ok(Self {
            resource: resource.to_string(),
            action: action.to_string(),
            scope,
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Same resource and action, ignoring scope.
    pub fn same_target(&self, other: &PermissionName) -> bool {
        self.resource == other.resource && self.action == other.action
    }
}

fn validate_segment(segment: &str) -> Result<(), PermissionParseError> {
    let valid = !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(PermissionParseError::InvalidSegment(segment.to_string()))
    }
}

impl FromStr for PermissionName {
    type Err = PermissionParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.trim().split(':').collect();
        let [resource, action, scope] = parts.as_slice() else {
            return Err(PermissionParseError::Shape(value.to_string()));
        };
        let scope = scope.parse::<Scope>()?;
        Self::new(resource, action, scope)
    }
}

impl TryFrom<String> for PermissionName {
    type Error = PermissionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PermissionName> for String {
    fn from(value: PermissionName) -> Self {
        value.to_string()
    }
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.resource, self.action, self.scope)
    }
}

// Ordered by name so sets and cache keys are deterministic.
impl Ord for PermissionName {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.resource, &self.action, self.scope.as_str()).cmp(&(
            &other.resource,
            &other.action,
            other.scope.as_str(),
        ))
    }
}

impl PartialOrd for PermissionName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
