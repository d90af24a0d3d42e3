// ABOUTME: Clone orchestrator: safety gate, phase sequencing, single-flight
// ABOUTME: Spawns the background executor and exposes status/cancel handles

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::backup::{BackupRunner, PgDumpBackup};
use crate::clone::{
    CloneStrategy, GranularStrategy, PgDumpCloner, PostgresCopier, PostgresDeleter,
};
use crate::config::{CloneConfig, CloneStrategyKind};
use crate::environment::{self, CloneRequest, Environment};
use crate::error::CloneError;
use crate::operation::{
    generate_operation_id, CloneProgress, OperationLogger, OperationRegistry, OperationStatus,
};
use crate::validator::{ConnectionValidator, PostgresValidator, WELL_KNOWN_TABLE};

/// Progress watermark after each phase. Values between watermarks are never
/// reported, so pollers see a coarse but strictly non-decreasing sequence.
const PROGRESS_VALIDATED: u8 = 10;
const PROGRESS_BACKED_UP: u8 = 20;
const PROGRESS_DATA_COPIED: u8 = 95;

/// Coordinates one clone at a time across its collaborators. Cheap to clone;
/// every handle shares the same registry, so status queries and cancellation
/// reach the operation no matter which handle spawned it.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<OperationRegistry>,
    validator: Arc<dyn ConnectionValidator>,
    backup: Arc<dyn BackupRunner>,
    strategy: Arc<dyn CloneStrategy>,
}

impl Orchestrator {
    pub fn new(
        validator: Arc<dyn ConnectionValidator>,
        backup: Arc<dyn BackupRunner>,
        strategy: Arc<dyn CloneStrategy>,
    ) -> Self {
        Self {
            registry: Arc::new(OperationRegistry::new()),
            validator,
            backup,
            strategy,
        }
    }

    /// Wire up the production collaborators described by the configuration.
    pub fn from_config(config: &CloneConfig) -> Self {
        let strategy: Arc<dyn CloneStrategy> = match config.strategy {
            CloneStrategyKind::Bulk => Arc::new(PgDumpCloner::new()),
            CloneStrategyKind::Granular => Arc::new(GranularStrategy::new(
                Arc::new(PostgresDeleter::new()),
                Arc::new(PostgresCopier::new()),
                config.defaults.batch_size,
            )),
        };
        Self::new(
            Arc::new(PostgresValidator::new()),
            Arc::new(PgDumpBackup::new(&config.backup_dir)),
            strategy,
        )
    }

    pub fn registry(&self) -> Arc<OperationRegistry> {
        self.registry.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.registry.is_busy()
    }

    /// Accept a clone request and run it in the background. Returns the
    /// operation id immediately; all request problems other than a concurrent
    /// clone surface asynchronously on the operation record, so callers have
    /// one uniform way to observe failures.
    pub fn start_clone(&self, request: CloneRequest) -> Result<String, CloneError> {
        let operation_id = generate_operation_id();
        self.registry.begin(CloneProgress::new(&operation_id))?;

        let orchestrator = self.clone();
        let spawned_id = operation_id.clone();
        tokio::spawn(async move {
            orchestrator.execute_clone(&spawned_id, &request).await;
        });

        Ok(operation_id)
    }

    /// Request cooperative cancellation. The executor observes the terminal
    /// record at the next phase boundary; work inside a phase runs to its end.
    pub fn cancel_operation(&self, operation_id: &str) -> bool {
        let cancelled = self.registry.cancel(operation_id);
        if cancelled {
            OperationLogger::new(self.registry.clone(), operation_id).info(
                "cancelled",
                "Cancellation requested; the clone stops at the next phase boundary",
            );
        }
        cancelled
    }

    pub fn operation_status(&self, operation_id: &str) -> Result<CloneProgress, CloneError> {
        self.registry
            .get(operation_id)
            .ok_or_else(|| CloneError::OperationNotFound(operation_id.to_string()))
    }

    async fn execute_clone(&self, operation_id: &str, request: &CloneRequest) {
        let logger = OperationLogger::new(self.registry.clone(), operation_id);
        if let Err(err) = self.run_phases(operation_id, request, &logger).await {
            let status = self
                .registry
                .get(operation_id)
                .map(|record| record.status)
                .unwrap_or(OperationStatus::Failed);
            logger.error(log_phase(status), format!("Clone failed: {:#}", err));
            self.registry.fail(operation_id);
        }
        // The slot is released on every exit path, including worker errors,
        // so a failed clone never wedges the orchestrator.
        self.registry.release();
    }

    async fn run_phases(
        &self,
        operation_id: &str,
        request: &CloneRequest,
        logger: &OperationLogger,
    ) -> Result<()> {
        let source = &request.source;
        let target = &request.target;

        self.registry
            .update_progress(operation_id, 0, OperationStatus::Validating);
        logger.info(
            "validation",
            format!("Starting clone from '{}' to '{}'", source.name, target.name),
        );

        // The name gate comes before anything touches the network. A
        // production-looking target fails here no matter what the
        // credentials would have allowed.
        enforce_safety_gate(target)?;

        for environment in [source, target] {
            if !environment.credentials.has_password() {
                bail!(
                    "environment '{}' has no database password configured",
                    environment.name
                );
            }
            if !environment::is_recognized_database_url(&environment.credentials.url) {
                bail!(
                    "environment '{}' has an unrecognized database URL",
                    environment.name
                );
            }
        }

        let summary = self
            .validator
            .validate_both(
                &source.credentials,
                &source.name,
                &target.credentials,
                &target.name,
            )
            .await;
        for warning in summary
            .source
            .warnings
            .iter()
            .chain(summary.target.warnings.iter())
        {
            logger.warning("validation", warning.clone());
        }
        if !summary.both_valid {
            let errors: Vec<String> = summary
                .source
                .errors
                .iter()
                .chain(summary.target.errors.iter())
                .cloned()
                .collect();
            bail!("environment validation failed: {}", errors.join("; "));
        }
        logger.success("validation", "Source and target connections validated");
        self.registry
            .update_progress(operation_id, PROGRESS_VALIDATED, OperationStatus::Validating);

        if self.stop_if_cancelled(operation_id, logger) {
            return Ok(());
        }

        if request.options.create_backup {
            self.registry.update_progress(
                operation_id,
                PROGRESS_VALIDATED,
                OperationStatus::BackingUp,
            );
            let info = self
                .backup
                .create_backup(&target.credentials, &target.name, logger)
                .await
                .context("target backup failed")?;
            logger.success(
                "backup",
                format!(
                    "Backup written to {} ({} bytes)",
                    info.path.display(),
                    info.size_bytes
                ),
            );
            self.registry
                .update_progress(operation_id, PROGRESS_BACKED_UP, OperationStatus::BackingUp);
        } else {
            logger.info("backup", "Target backup disabled for this clone");
        }

        if self.stop_if_cancelled(operation_id, logger) {
            return Ok(());
        }

        self.registry.update_progress(
            operation_id,
            PROGRESS_BACKED_UP,
            OperationStatus::CopyingData,
        );
        logger.info(
            "clone",
            format!("Copying data using the {} strategy", self.strategy.name()),
        );
        let result = self.strategy.execute(request, logger).await?;
        self.registry.record_phase_result(operation_id, &result);
        self.registry.update_progress(
            operation_id,
            PROGRESS_DATA_COPIED,
            OperationStatus::CopyingData,
        );

        if self.stop_if_cancelled(operation_id, logger) {
            return Ok(());
        }

        logger.info("validation", "Running final validation on the target");
        if !self
            .validator
            .can_access_table(&target.credentials, WELL_KNOWN_TABLE)
            .await
        {
            bail!(
                "final validation failed: table '{}' is not readable on '{}'",
                WELL_KNOWN_TABLE,
                target.name
            );
        }

        logger.success(
            "clone",
            format!(
                "Clone from '{}' to '{}' completed",
                source.name, target.name
            ),
        );
        self.registry.complete(operation_id);
        Ok(())
    }

    /// True when the operation was cancelled. The terminal record is already
    /// sealed at that point, so the executor just stops scheduling phases.
    fn stop_if_cancelled(&self, operation_id: &str, logger: &OperationLogger) -> bool {
        if self.registry.is_cancelled(operation_id) {
            logger.info("cancelled", "Clone stopped at a phase boundary");
            return true;
        }
        false
    }
}

fn enforce_safety_gate(target: &Environment) -> Result<(), CloneError> {
    if target.is_production_named() {
        return Err(CloneError::ProductionProtection(target.name.clone()));
    }
    Ok(())
}

/// Short phase key for log entries, derived from the operation status.
fn log_phase(status: OperationStatus) -> &'static str {
    match status {
        OperationStatus::Pending => "startup",
        OperationStatus::Validating => "validation",
        OperationStatus::BackingUp => "backup",
        _ => "clone",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentCredentials;

    #[test]
    fn safety_gate_rejects_production_looking_names() {
        let creds = EnvironmentCredentials::new("postgres://db.example.com/app", "key");
        let err = enforce_safety_gate(&Environment::new("prod-eu", creds.clone())).unwrap_err();
        assert!(matches!(err, CloneError::ProductionProtection(name) if name == "prod-eu"));
        assert!(enforce_safety_gate(&Environment::new("staging", creds)).is_ok());
    }

    #[test]
    fn log_phase_tracks_the_active_status() {
        assert_eq!(log_phase(OperationStatus::Validating), "validation");
        assert_eq!(log_phase(OperationStatus::BackingUp), "backup");
        assert_eq!(log_phase(OperationStatus::CopyingData), "clone");
        assert_eq!(log_phase(OperationStatus::Failed), "clone");
    }

    #[tokio::test]
    async fn unknown_operation_ids_are_reported_as_such() {
        let orchestrator = Orchestrator::new(
            Arc::new(PostgresValidator::new()),
            Arc::new(PgDumpBackup::new("/tmp/backups")),
            Arc::new(PgDumpCloner::new()),
        );
        let err = orchestrator.operation_status("clone_0_zzzzzz").unwrap_err();
        assert!(matches!(err, CloneError::OperationNotFound(_)));
    }
}
