// ABOUTME: Granular-path data deletion: wipes all rows from a target environment
// ABOUTME: Refuses to act without explicit confirmation and names every table cleared

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::backup::BackupRunner;
use crate::db;
use crate::environment::EnvironmentCredentials;
use crate::operation::OperationLogger;

const LOG_PHASE: &str = "delete";

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    /// Dump the environment before clearing it. Requires a configured
    /// backup runner.
    pub create_backup: bool,
    /// Deletion never proceeds without this set.
    pub confirm_deletion: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteResult {
    pub success: bool,
    pub tables_cleared: Vec<String>,
    pub errors: Vec<String>,
}

/// Destructive seam consumed by the granular strategy and the wipe command.
#[async_trait]
pub trait DataDeleter: Send + Sync {
    async fn delete_all_data(
        &self,
        credentials: &EnvironmentCredentials,
        environment_name: &str,
        options: &DeleteOptions,
        logger: &OperationLogger,
    ) -> Result<DeleteResult>;
}

/// Clears every public table on the environment with TRUNCATE ... CASCADE,
/// reporting exactly which tables were cleared so callers can attribute
/// statistics accurately.
pub struct PostgresDeleter {
    backup: Option<Arc<dyn BackupRunner>>,
}

impl PostgresDeleter {
    pub fn new() -> Self {
        Self { backup: None }
    }

    pub fn with_backup(mut self, backup: Arc<dyn BackupRunner>) -> Self {
        self.backup = Some(backup);
        self
    }
}

impl Default for PostgresDeleter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataDeleter for PostgresDeleter {
    async fn delete_all_data(
        &self,
        credentials: &EnvironmentCredentials,
        environment_name: &str,
        options: &DeleteOptions,
        logger: &OperationLogger,
    ) -> Result<DeleteResult> {
        if !options.confirm_deletion {
            bail!(
                "refusing to delete all data in '{}' without explicit confirmation",
                environment_name
            );
        }

        if options.create_backup {
            let Some(backup) = &self.backup else {
                bail!("backup requested before deletion, but no backup runner is configured");
            };
            backup
                .create_backup(credentials, environment_name, logger)
                .await
                .context("pre-delete backup failed")?;
        }

        let client = db::connect(credentials)
            .await
            .with_context(|| format!("Failed to connect to '{}' for deletion", environment_name))?;
        let tables = db::list_public_tables(&client).await?;
        logger.info(
            LOG_PHASE,
            format!("Clearing {} tables in '{}'", tables.len(), environment_name),
        );

        let mut result = DeleteResult::default();
        for table in &tables {
            let statement = format!("TRUNCATE TABLE {} CASCADE", db::quote_ident(table));
            match client.execute(statement.as_str(), &[]).await {
                Ok(_) => result.tables_cleared.push(table.clone()),
                Err(err) => {
                    logger.error(LOG_PHASE, format!("failed to clear '{}': {}", table, err));
                    result.errors.push(format!("{}: {}", table, err));
                }
            }
        }

        result.success = result.errors.is_empty();
        if result.success {
            logger.info(
                LOG_PHASE,
                format!("Cleared {} tables", result.tables_cleared.len()),
            );
        }
        Ok(result)
    }
}
