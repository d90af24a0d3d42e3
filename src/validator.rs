// ABOUTME: Connection and permission validation for database environments
// ABOUTME: All probes are read-only or self-cleaning; nothing here mutates data

use async_trait::async_trait;
use serde::Serialize;
use tokio_postgres::error::SqlState;

use crate::db;
use crate::environment::EnvironmentCredentials;

/// The platform's anchor table. Every rental-platform environment carries it,
/// which makes it the cheapest structural probe available.
pub const WELL_KNOWN_TABLE: &str = "properties";

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ValidationChecks {
    pub connection_successful: bool,
    pub has_read_permission: bool,
    pub has_write_permission: bool,
    pub schema_accessible: bool,
}

/// Outcome of validating one environment. Produced fresh per call and never
/// mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub environment: String,
    pub checks: ValidationChecks,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            environment: environment.into(),
            checks: ValidationChecks::default(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Derive `is_valid`: connection, read, and write must all hold. Schema
    /// accessibility is advisory only.
    pub fn finalize(mut self) -> Self {
        self.is_valid = self.checks.connection_successful
            && self.checks.has_read_permission
            && self.checks.has_write_permission;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    pub source: ValidationResult,
    pub target: ValidationResult,
    pub both_valid: bool,
}

/// Validation seam injected into the orchestrator. Implementations must not
/// perform any destructive action.
#[async_trait]
pub trait ConnectionValidator: Send + Sync {
    async fn validate_connection(
        &self,
        credentials: &EnvironmentCredentials,
        environment_name: &str,
    ) -> ValidationResult;

    /// Single-table read probe, used for targeted diagnostics and the final
    /// structural check after a clone.
    async fn can_access_table(&self, credentials: &EnvironmentCredentials, table_name: &str)
        -> bool;

    /// Validate source and target concurrently.
    async fn validate_both(
        &self,
        source: &EnvironmentCredentials,
        source_name: &str,
        target: &EnvironmentCredentials,
        target_name: &str,
    ) -> ValidationSummary {
        let (source, target) = tokio::join!(
            self.validate_connection(source, source_name),
            self.validate_connection(target, target_name)
        );
        let both_valid = source.is_valid && target.is_valid;
        ValidationSummary {
            source,
            target,
            both_valid,
        }
    }
}

/// Live validator probing real PostgreSQL environments.
pub struct PostgresValidator;

impl PostgresValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PostgresValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionValidator for PostgresValidator {
    async fn validate_connection(
        &self,
        credentials: &EnvironmentCredentials,
        environment_name: &str,
    ) -> ValidationResult {
        let mut result = ValidationResult::new(environment_name);

        let client = match db::connect(credentials).await {
            Ok(client) => {
                result.checks.connection_successful = true;
                client
            }
            Err(err) => {
                result.errors.push(format!("{:#}", err));
                return result.finalize();
            }
        };

        // Read probe against the anchor table. A missing table means an empty
        // or unseeded environment, not a missing permission.
        let read_probe = format!(
            "SELECT 1 FROM {} LIMIT 1",
            db::quote_ident(WELL_KNOWN_TABLE)
        );
        match client.query(read_probe.as_str(), &[]).await {
            Ok(_) => result.checks.has_read_permission = true,
            Err(err) if has_code(&err, &SqlState::UNDEFINED_TABLE) => {
                result.checks.has_read_permission = true;
                result.warnings.push(format!(
                    "table '{}' does not exist in '{}'",
                    WELL_KNOWN_TABLE, environment_name
                ));
            }
            Err(err) => result.errors.push(format!("read probe failed: {}", err)),
        }

        // Write probe that leaves nothing behind: temp tables die with the
        // session.
        match client
            .batch_execute(
                "CREATE TEMP TABLE _env_clone_write_probe (id integer); \
                 DROP TABLE _env_clone_write_probe;",
            )
            .await
        {
            Ok(()) => result.checks.has_write_permission = true,
            Err(err) => result.errors.push(format!("write probe failed: {}", err)),
        }

        // Some hosted environments restrict information_schema; that does not
        // block cloning, so treat it as satisfied and note the restriction.
        match client
            .query(
                "SELECT count(*) FROM information_schema.tables WHERE table_schema = 'public'",
                &[],
            )
            .await
        {
            Ok(_) => result.checks.schema_accessible = true,
            Err(err) => {
                result.checks.schema_accessible = true;
                result
                    .warnings
                    .push(format!("schema introspection unavailable: {}", err));
            }
        }

        result.finalize()
    }

    async fn can_access_table(
        &self,
        credentials: &EnvironmentCredentials,
        table_name: &str,
    ) -> bool {
        let Ok(client) = db::connect(credentials).await else {
            return false;
        };
        let probe = format!("SELECT 1 FROM {} LIMIT 1", db::quote_ident(table_name));
        client.query(probe.as_str(), &[]).await.is_ok()
    }
}

fn has_code(err: &tokio_postgres::Error, code: &SqlState) -> bool {
    err.code() == Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(checks: ValidationChecks) -> ValidationResult {
        let mut result = ValidationResult::new("staging");
        result.checks = checks;
        result.finalize()
    }

    #[test]
    fn validity_requires_connection_read_and_write() {
        let all = ValidationChecks {
            connection_successful: true,
            has_read_permission: true,
            has_write_permission: true,
            schema_accessible: true,
        };
        assert!(result_with(all).is_valid);

        let no_write = ValidationChecks {
            has_write_permission: false,
            ..all
        };
        assert!(!result_with(no_write).is_valid);

        let no_read = ValidationChecks {
            has_read_permission: false,
            ..all
        };
        assert!(!result_with(no_read).is_valid);
    }

    #[test]
    fn schema_access_is_advisory_only() {
        let checks = ValidationChecks {
            connection_successful: true,
            has_read_permission: true,
            has_write_permission: true,
            schema_accessible: false,
        };
        assert!(result_with(checks).is_valid);
    }

    struct FixedValidator;

    #[async_trait]
    impl ConnectionValidator for FixedValidator {
        async fn validate_connection(
            &self,
            _credentials: &EnvironmentCredentials,
            environment_name: &str,
        ) -> ValidationResult {
            let mut result = ValidationResult::new(environment_name);
            if environment_name != "broken" {
                result.checks = ValidationChecks {
                    connection_successful: true,
                    has_read_permission: true,
                    has_write_permission: true,
                    schema_accessible: true,
                };
            }
            result.finalize()
        }

        async fn can_access_table(
            &self,
            _credentials: &EnvironmentCredentials,
            _table_name: &str,
        ) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn both_valid_is_the_conjunction_of_both_sides() {
        let creds = EnvironmentCredentials::new("postgres://db.example.com/r", "key");
        let validator = FixedValidator;

        let summary = validator
            .validate_both(&creds, "staging", &creds, "test")
            .await;
        assert!(summary.both_valid);

        let summary = validator
            .validate_both(&creds, "staging", &creds, "broken")
            .await;
        assert!(!summary.both_valid);
        assert!(summary.source.is_valid);
        assert!(!summary.target.is_valid);
    }
}
