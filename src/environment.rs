// ABOUTME: Data model for database environments and clone requests
// ABOUTME: Carries the production-name gate and connection URL recognition

use std::fmt;

use serde::Deserialize;

/// Substring that marks an environment name as production. The orchestrator
/// refuses to treat any matching environment as a clone target.
const PROTECTED_NAME_PATTERN: &str = "prod";

/// Connection coordinates for one database environment. Read-only once built.
///
/// `service_key` is the platform service credential that accompanies the
/// database URL in this deployment; it is carried opaquely and never logged.
#[derive(Clone, Deserialize)]
pub struct EnvironmentCredentials {
    pub url: String,
    pub service_key: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl EnvironmentCredentials {
    pub fn new(url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            service_key: service_key.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn has_password(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

// Secrets stay out of logs and panics.
impl fmt::Debug for EnvironmentCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentCredentials")
            .field("url", &self.url)
            .field("service_key", &"***")
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A named environment with its credentials, e.g. "staging" or "test".
#[derive(Debug, Clone)]
pub struct Environment {
    pub name: String,
    pub credentials: EnvironmentCredentials,
}

impl Environment {
    pub fn new(name: impl Into<String>, credentials: EnvironmentCredentials) -> Self {
        Self {
            name: name.into(),
            credentials,
        }
    }

    /// True when this environment's name matches the protected production
    /// pattern (case-insensitive substring match).
    pub fn is_production_named(&self) -> bool {
        is_production_name(&self.name)
    }
}

pub fn is_production_name(name: &str) -> bool {
    name.to_lowercase().contains(PROTECTED_NAME_PATTERN)
}

/// True when the URL looks like a PostgreSQL connection URL we know how to
/// reach: `postgres://` or `postgresql://` scheme with a non-empty host.
pub fn is_recognized_database_url(url: &str) -> bool {
    let rest = match url
        .strip_prefix("postgres://")
        .or_else(|| url.strip_prefix("postgresql://"))
    {
        Some(rest) => rest,
        None => return false,
    };

    // Host lives between the optional user@ part and the first /, : or ?.
    let after_user = rest.rsplit_once('@').map_or(rest, |(_, host)| host);
    let host = after_user
        .split(['/', ':', '?'])
        .next()
        .unwrap_or_default();
    !host.is_empty()
}

/// Behavior switches for one clone run.
#[derive(Debug, Clone, Copy)]
pub struct CloneOptions {
    /// Dump the target before any destructive action.
    pub create_backup: bool,
    /// Include the platform's `storage` schema in the clone.
    pub include_storage: bool,
    /// Replace sensitive column values with synthetic ones while copying.
    pub anonymize_data: bool,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            create_backup: true,
            include_storage: false,
            anonymize_data: false,
        }
    }
}

/// One clone intent: fully describes what to copy where. Immutable once
/// submitted to the orchestrator.
#[derive(Debug, Clone)]
pub struct CloneRequest {
    pub source: Environment,
    pub target: Environment,
    pub options: CloneOptions,
}

impl CloneRequest {
    pub fn new(source: Environment, target: Environment, options: CloneOptions) -> Self {
        Self {
            source,
            target,
            options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_names_are_detected_case_insensitively() {
        assert!(is_production_name("prod"));
        assert!(is_production_name("prod-main"));
        assert!(is_production_name("PRODUCTION"));
        assert!(is_production_name("pre-Prod"));
        assert!(!is_production_name("staging"));
        assert!(!is_production_name("test"));
    }

    #[test]
    fn recognized_urls_require_postgres_scheme_and_host() {
        assert!(is_recognized_database_url(
            "postgres://app@db.staging.example.com:5432/rentals"
        ));
        assert!(is_recognized_database_url(
            "postgresql://db.test.example.com/rentals"
        ));
        assert!(!is_recognized_database_url(
            "https://db.staging.example.com"
        ));
        assert!(!is_recognized_database_url("postgres://"));
        assert!(!is_recognized_database_url("postgres://user@"));
        assert!(!is_recognized_database_url(""));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = EnvironmentCredentials::new("postgres://db.example.com/r", "svc-key-123")
            .with_password("hunter2");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("svc-key-123"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("db.example.com"));
    }

    #[test]
    fn empty_password_does_not_count() {
        let creds = EnvironmentCredentials::new("postgres://h/db", "key").with_password("");
        assert!(!creds.has_password());
        let creds = creds.with_password("secret");
        assert!(creds.has_password());
    }
}
