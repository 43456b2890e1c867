//! Enforcement mode controller.
//!
//! The mode is resolved once, validated against the runtime environment and
//! the loaded catalog, and then frozen. There is no setter: changing the mode
//! requires a restart.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::catalog::PermissionCatalog;
use crate::config::AuthzConfig;
use crate::errors::AppError;

/// Whether guard denials block requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnforcementMode {
    /// Denials return 403.
    Enforce,
    /// Denials are logged and audited, the handler still runs.
    DryRun,
    /// No evaluation at all.
    Disabled,
}

impl EnforcementMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementMode::Enforce => "enforce",
            EnforcementMode::DryRun => "dry-run",
            EnforcementMode::Disabled => "disabled",
        }
    }
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnforcementMode {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "enforce" => Ok(EnforcementMode::Enforce),
            "dry-run" | "dry_run" | "dryrun" => Ok(EnforcementMode::DryRun),
            "disabled" => Ok(EnforcementMode::Disabled),
            other => Err(AppError::configuration(format!(
                "RBAC_ENFORCEMENT must be one of enforce, dry-run, disabled; got '{other}'"
            ))),
        }
    }
}

/// Where the process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    Development,
    Test,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, RuntimeEnvironment::Production)
    }
}

impl FromStr for RuntimeEnvironment {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(RuntimeEnvironment::Development),
            "test" => Ok(RuntimeEnvironment::Test),
            "staging" => Ok(RuntimeEnvironment::Staging),
            "production" | "prod" => Ok(RuntimeEnvironment::Production),
            other => Err(AppError::configuration(format!("unknown APP_ENV '{other}'"))),
        }
    }
}

/// Lifecycle of the controller. `Active` is terminal for the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    Validating,
    Active(EnforcementMode),
}

#[derive(Debug)]
pub struct EnforcementController {
    state: ControllerState,
}

impl EnforcementController {
    /// Validates the configured mode and freezes it.
    ///
    /// Fails when the catalog is empty (nothing could ever be allowed) or when a
    /// production process is configured with anything other than `enforce`.
    pub fn initialize(config: &AuthzConfig, catalog: &PermissionCatalog) -> Result<Self, AppError> {
        let mut controller = Self {
            state: ControllerState::Uninitialized,
        };
        controller.state = ControllerState::Validating;

        if catalog.is_empty() {
            tracing::error!("permission catalog is empty; refusing to start");
            return Err(AppError::configuration(
                "permission catalog is empty; every permission check would deny",
            ));
        }

        if config.environment.is_production() && config.enforcement != EnforcementMode::Enforce {
            tracing::error!(
                mode = %config.enforcement,
                "RBAC enforcement mode rejected for production"
            );
            return Err(AppError::configuration(format!(
                "RBAC must be enforced in production (RBAC_ENFORCEMENT={})",
                config.enforcement
            )));
        }

        if config.enforcement != EnforcementMode::Enforce {
            tracing::warn!(
                mode = %config.enforcement,
                environment = ?config.environment,
                "RBAC enforcement is relaxed; denials will not block requests"
            );
        } else {
            tracing::info!(catalog_size = catalog.len(), "RBAC enforcement active");
        }

        controller.state = ControllerState::Active(config.enforcement);
        Ok(controller)
    }

    pub fn mode(&self) -> EnforcementMode {
        match self.state {
            ControllerState::Active(mode) => mode,
            // Unreachable through `initialize`; fall back to the strictest mode.
            ControllerState::Uninitialized | ControllerState::Validating => EnforcementMode::Enforce,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rbac::Permission;

    fn catalog() -> PermissionCatalog {
        PermissionCatalog::from_entries(vec![Permission {
            name: "contract:read:own".parse().unwrap(),
            description: "Read own contracts".to_string(),
            category: "contracts".to_string(),
        }])
    }

    fn config(environment: RuntimeEnvironment, enforcement: EnforcementMode) -> AuthzConfig {
        AuthzConfig {
            environment,
            enforcement,
            ..AuthzConfig::default()
        }
    }

    #[test]
    fn production_dry_run_is_fatal() {
        let err = EnforcementController::initialize(
            &config(RuntimeEnvironment::Production, EnforcementMode::DryRun),
            &catalog(),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Configuration(ref msg) if msg.contains("RBAC must be enforced in production")));
    }

    #[test]
    fn production_disabled_is_fatal() {
        let result = EnforcementController::initialize(
            &config(RuntimeEnvironment::Production, EnforcementMode::Disabled),
            &catalog(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn production_enforce_starts() {
        let controller = EnforcementController::initialize(
            &config(RuntimeEnvironment::Production, EnforcementMode::Enforce),
            &catalog(),
        )
        .unwrap();
        assert_eq!(controller.state(), ControllerState::Active(EnforcementMode::Enforce));
    }

    #[test]
    fn development_may_relax_enforcement() {
        let controller = EnforcementController::initialize(
            &config(RuntimeEnvironment::Development, EnforcementMode::DryRun),
            &catalog(),
        )
        .unwrap();
        assert_eq!(controller.mode(), EnforcementMode::DryRun);
    }

    #[test]
    fn empty_catalog_is_fatal_in_every_mode() {
        for mode in [EnforcementMode::Enforce, EnforcementMode::DryRun, EnforcementMode::Disabled] {
            let result = EnforcementController::initialize(
                &config(RuntimeEnvironment::Development, mode),
                &PermissionCatalog::from_entries(Vec::new()),
            );
            assert!(result.is_err());
        }
    }

    #[test]
    fn mode_parsing_accepts_documented_values() {
        assert_eq!("enforce".parse::<EnforcementMode>().unwrap(), EnforcementMode::Enforce);
        assert_eq!("dry-run".parse::<EnforcementMode>().unwrap(), EnforcementMode::DryRun);
        assert_eq!("DISABLED".parse::<EnforcementMode>().unwrap(), EnforcementMode::Disabled);
        assert!("off".parse::<EnforcementMode>().is_err());
        assert!("moon".parse::<RuntimeEnvironment>().is_err());
        assert!("prod".parse::<RuntimeEnvironment>().unwrap().is_production());
    }
}
