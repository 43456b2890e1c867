//! Process configuration, read once at startup.

use std::time::Duration;

use crate::authz::{EnforcementMode, RuntimeEnvironment};
use crate::errors::AppError;

const DEFAULT_CACHE_TTL_SECS: u64 = 600;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_APP_PORT: u16 = 8000;

/// Settings for the permission core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthzConfig {
    pub environment: RuntimeEnvironment,
    pub enforcement: EnforcementMode,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub store_timeout: Duration,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            environment: RuntimeEnvironment::Development,
            enforcement: EnforcementMode::Enforce,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
        }
    }
}

impl AuthzConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unset keys fall back to defaults;
    /// set-but-invalid keys are configuration errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        let environment = match non_empty(lookup("APP_ENV")) {
            Some(value) => value.parse::<RuntimeEnvironment>()?,
            None => defaults.environment,
        };
        let enforcement = match non_empty(lookup("RBAC_ENFORCEMENT")) {
            Some(value) => value.parse::<EnforcementMode>()?,
            None => defaults.enforcement,
        };
        let cache_ttl = parse_number::<u64>(&lookup, "RBAC_CACHE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.cache_ttl);
        let cache_max_entries = parse_number::<usize>(&lookup, "RBAC_CACHE_MAX_ENTRIES")?
            .unwrap_or(defaults.cache_max_entries);
        let store_timeout = parse_number::<u64>(&lookup, "RBAC_STORE_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.store_timeout);

        if store_timeout.is_zero() {
            return Err(AppError::configuration("RBAC_STORE_TIMEOUT_MS must be greater than zero"));
        }

        Ok(Self {
            environment,
            enforcement,
            cache_ttl,
            cache_max_entries,
            store_timeout,
        })
    }
}

/// Everything the server binary needs.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub authz: AuthzConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| AppError::configuration("DATABASE_URL not set"))?;
        let port = parse_number::<u16>(&|key| std::env::var(key).ok(), "APP_PORT")?
            .unwrap_or(DEFAULT_APP_PORT);

        Ok(Self {
            database_url,
            port,
            authz: AuthzConfig::from_env()?,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, AppError> {
    non_empty(lookup(key))
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|_| AppError::configuration(format!("{key} must be a valid number, got '{value}'")))
        })
        .transpose()
}
