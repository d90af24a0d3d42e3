// ABOUTME: Point-in-time target backups taken before destructive clone phases
// ABOUTME: Dumps land as timestamped custom-format files in the backup directory

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clone::pg_dump::{build_dump_args, run_tool, stderr_tail, CloneDatabaseOptions};
use crate::environment::EnvironmentCredentials;
use crate::operation::OperationLogger;

const LOG_PHASE: &str = "backup";

#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Backup seam injected into the orchestrator and the deleter. The backup
/// file is the only durable artifact this tool produces.
#[async_trait]
pub trait BackupRunner: Send + Sync {
    async fn create_backup(
        &self,
        credentials: &EnvironmentCredentials,
        environment_name: &str,
        logger: &OperationLogger,
    ) -> Result<BackupInfo>;
}

/// Takes a compressed custom-format pg_dump of the environment into the
/// configured backup directory.
pub struct PgDumpBackup {
    backup_dir: PathBuf,
}

impl PgDumpBackup {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }
}

#[async_trait]
impl BackupRunner for PgDumpBackup {
    async fn create_backup(
        &self,
        credentials: &EnvironmentCredentials,
        environment_name: &str,
        logger: &OperationLogger,
    ) -> Result<BackupInfo> {
        let pg_dump = which::which("pg_dump")
            .context("pg_dump not found on PATH; install the PostgreSQL client tools")?;
        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create backup directory {}",
                    self.backup_dir.display()
                )
            })?;

        let path = self
            .backup_dir
            .join(backup_file_name(environment_name, Utc::now()));
        logger.info(
            LOG_PHASE,
            format!("Backing up '{}' to {}", environment_name, path.display()),
        );

        let options = CloneDatabaseOptions {
            exclude_schemas: Vec::new(),
            verbose: false,
            compress: true,
        };
        let args = build_dump_args(&credentials.url, &path, &options);
        let output = run_tool(&pg_dump, &args, credentials.password.as_deref()).await?;
        if !output.status.success() {
            bail!(
                "pg_dump backup failed: {}",
                stderr_tail(&output.stderr).join("; ")
            );
        }

        let size_bytes = tokio::fs::metadata(&path)
            .await
            .context("Backup file missing after pg_dump reported success")?
            .len();
        logger.success(LOG_PHASE, format!("Backup complete ({} bytes)", size_bytes));
        Ok(BackupInfo { path, size_bytes })
    }
}

fn backup_file_name(environment_name: &str, at: DateTime<Utc>) -> String {
    let safe: String = environment_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}.dump", safe, at.format("%Y%m%d_%H%M%S"))
}
