// ABOUTME: Bulk clone strategy: whole-database pg_dump piped through pg_restore
// ABOUTME: One atomic external operation; only size, duration, and errors surface

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::clone::CloneStrategy;
use crate::environment::{CloneRequest, EnvironmentCredentials};
use crate::operation::{OperationLogger, PhaseResult};

const LOG_PHASE: &str = "clone";
/// How many trailing stderr lines to keep when a tool fails.
const ERROR_TAIL: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct CloneDatabaseOptions {
    pub exclude_schemas: Vec<String>,
    pub verbose: bool,
    pub compress: bool,
}

/// Outcome of one dump/restore run. `success: false` carries the tool's
/// stderr tail instead of aborting with an error, so callers can attribute
/// the failure to the exact tool output.
#[derive(Debug, Clone)]
pub struct CloneResult {
    pub success: bool,
    pub dump_size: Option<u64>,
    pub duration: Duration,
    pub errors: Vec<String>,
}

/// Clones a whole database by invoking the PostgreSQL client tools. The
/// dump-then-restore pair is treated as a single atomic unit: there is no
/// per-table progress, only success or failure.
pub struct PgDumpCloner {
    verbose: bool,
}

impl PgDumpCloner {
    pub fn new() -> Self {
        Self { verbose: false }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub async fn clone_database(
        &self,
        source: &EnvironmentCredentials,
        target: &EnvironmentCredentials,
        options: &CloneDatabaseOptions,
        logger: &OperationLogger,
    ) -> Result<CloneResult> {
        let started = Instant::now();
        let pg_dump = which::which("pg_dump")
            .context("pg_dump not found on PATH; install the PostgreSQL client tools")?;
        let pg_restore = which::which("pg_restore")
            .context("pg_restore not found on PATH; install the PostgreSQL client tools")?;

        let scratch = tempfile::Builder::new()
            .prefix("env_clone_")
            .tempdir()
            .context("Failed to create scratch directory for the dump")?;
        let dump_path = scratch.path().join("database.dump");

        if options.exclude_schemas.is_empty() {
            logger.info(LOG_PHASE, "Dumping source database (all schemas)");
        } else {
            logger.info(
                LOG_PHASE,
                format!(
                    "Dumping source database (excluding schemas: {})",
                    options.exclude_schemas.join(", ")
                ),
            );
        }

        let dump_args = build_dump_args(&source.url, &dump_path, options);
        let output = run_tool(&pg_dump, &dump_args, source.password.as_deref()).await?;
        if !output.status.success() {
            return Ok(CloneResult {
                success: false,
                dump_size: None,
                duration: started.elapsed(),
                errors: stderr_tail(&output.stderr),
            });
        }

        let dump_size = tokio::fs::metadata(&dump_path)
            .await
            .map(|meta| meta.len())
            .context("Dump file missing after pg_dump reported success")?;
        logger.info(
            LOG_PHASE,
            format!("Dump complete ({} bytes), restoring into target", dump_size),
        );

        let restore_args = build_restore_args(&target.url, &dump_path, options);
        let output = run_tool(&pg_restore, &restore_args, target.password.as_deref()).await?;
        if !output.status.success() {
            return Ok(CloneResult {
                success: false,
                dump_size: Some(dump_size),
                duration: started.elapsed(),
                errors: stderr_tail(&output.stderr),
            });
        }

        Ok(CloneResult {
            success: true,
            dump_size: Some(dump_size),
            duration: started.elapsed(),
            errors: Vec::new(),
        })
    }
}

impl Default for PgDumpCloner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CloneStrategy for PgDumpCloner {
    fn name(&self) -> &'static str {
        "bulk"
    }

    async fn execute(&self, request: &CloneRequest, logger: &OperationLogger) -> Result<PhaseResult> {
        let exclude_schemas = if request.options.include_storage {
            Vec::new()
        } else {
            vec!["storage".to_string()]
        };
        let options = CloneDatabaseOptions {
            exclude_schemas,
            verbose: self.verbose,
            compress: false,
        };

        let result = self
            .clone_database(
                &request.source.credentials,
                &request.target.credentials,
                &options,
                logger,
            )
            .await?;

        if result.success {
            logger.success(
                LOG_PHASE,
                format!(
                    "Bulk clone finished in {:.1}s ({} bytes transferred)",
                    result.duration.as_secs_f64(),
                    result.dump_size.unwrap_or(0)
                ),
            );
        }
        phase_result_from(result)
    }
}

/// Translate a tool-level result into the strategy contract: a failed run
/// becomes a phase error whose message joins the reported error list.
fn phase_result_from(result: CloneResult) -> Result<PhaseResult> {
    if !result.success {
        bail!("bulk clone failed: {}", result.errors.join("; "));
    }
    let bytes = result.dump_size.unwrap_or(0);
    Ok(PhaseResult {
        bytes_processed: bytes,
        total_bytes: bytes,
        ..PhaseResult::default()
    })
}

pub(crate) fn build_dump_args(url: &str, dump_path: &Path, options: &CloneDatabaseOptions) -> Vec<String> {
    let mut args = vec![
        "--format=custom".to_string(),
        format!("--file={}", dump_path.display()),
    ];
    if !options.compress {
        args.push("--compress=0".to_string());
    }
    for schema in &options.exclude_schemas {
        args.push(format!("--exclude-schema={}", schema));
    }
    if options.verbose {
        args.push("--verbose".to_string());
    }
    args.push(url.to_string());
    args
}

pub(crate) fn build_restore_args(url: &str, dump_path: &Path, options: &CloneDatabaseOptions) -> Vec<String> {
    let mut args = vec![
        "--clean".to_string(),
        "--if-exists".to_string(),
        "--no-owner".to_string(),
        "--no-acl".to_string(),
        format!("--dbname={}", url),
    ];
    if options.verbose {
        args.push("--verbose".to_string());
    }
    args.push(dump_path.display().to_string());
    args
}

pub(crate) async fn run_tool(
    binary: &Path,
    args: &[String],
    password: Option<&str>,
) -> Result<std::process::Output> {
    let mut cmd = Command::new(binary);
    cmd.args(args);
    if let Some(password) = password {
        if !password.is_empty() {
            cmd.env("PGPASSWORD", password);
        }
    }
    cmd.output()
        .await
        .with_context(|| format!("Failed to run {}", binary.display()))
}

pub(crate) fn stderr_tail(stderr: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<String> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.to_string())
        .collect();
    let skip = lines.len().saturating_sub(ERROR_TAIL);
    lines.into_iter().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn options(exclude: &[&str], compress: bool, verbose: bool) -> CloneDatabaseOptions {
        CloneDatabaseOptions {
            exclude_schemas: exclude.iter().map(|s| s.to_string()).collect(),
            verbose,
            compress,
        }
    }

    #[test]
    fn dump_args_exclude_schemas_and_disable_compression() {
        let path = PathBuf::from("/tmp/scratch/database.dump");
        let args = build_dump_args(
            "postgres://db.staging.example.com/rentals",
            &path,
            &options(&["storage"], false, false),
        );
        assert!(args.contains(&"--format=custom".to_string()));
        assert!(args.contains(&"--compress=0".to_string()));
        assert!(args.contains(&"--exclude-schema=storage".to_string()));
        assert_eq!(
            args.last().unwrap(),
            "postgres://db.staging.example.com/rentals"
        );
    }

    #[test]
    fn dump_args_without_exclusions_keep_all_schemas() {
        let path = PathBuf::from("/tmp/d.dump");
        let args = build_dump_args("postgres://h/db", &path, &options(&[], true, true));
        assert!(!args.iter().any(|a| a.starts_with("--exclude-schema")));
        assert!(!args.contains(&"--compress=0".to_string()));
        assert!(args.contains(&"--verbose".to_string()));
    }

    #[test]
    fn restore_args_drop_existing_objects_and_ownership() {
        let path = PathBuf::from("/tmp/d.dump");
        let args = build_restore_args("postgres://h/db", &path, &options(&[], false, false));
        assert!(args.contains(&"--clean".to_string()));
        assert!(args.contains(&"--if-exists".to_string()));
        assert!(args.contains(&"--no-owner".to_string()));
        assert!(args.contains(&"--no-acl".to_string()));
        assert!(args.contains(&"--dbname=postgres://h/db".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/d.dump");
    }

    #[test]
    fn failed_result_becomes_error_with_joined_messages() {
        let result = CloneResult {
            success: false,
            dump_size: None,
            duration: Duration::from_secs(3),
            errors: vec!["connection refused".to_string(), "dump aborted".to_string()],
        };
        let err = phase_result_from(result).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("connection refused; dump aborted"));
    }

    #[test]
    fn successful_result_reports_dump_size_as_bytes() {
        let result = CloneResult {
            success: true,
            dump_size: Some(52_428_800),
            duration: Duration::from_secs(40),
            errors: Vec::new(),
        };
        let phase = phase_result_from(result).unwrap();
        assert_eq!(phase.bytes_processed, 52_428_800);
        assert_eq!(phase.total_bytes, 52_428_800);
        assert_eq!(phase.tables_processed, 0);
    }

    #[test]
    fn stderr_tail_keeps_only_trailing_lines() {
        let stderr: String = (0..20).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(stderr.as_bytes());
        assert_eq!(tail.len(), ERROR_TAIL);
        assert_eq!(tail.first().unwrap(), "line 10");
        assert_eq!(tail.last().unwrap(), "line 19");
    }
}
