// ABOUTME: Granular clone strategy: clear target, copy rows, recreate routines
// ABOUTME: Assumes source and target schemas are already compatible

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio_postgres::Client;

use crate::clone::copier::{CopyOptions, DataCopier};
use crate::clone::deleter::{DataDeleter, DeleteOptions};
use crate::clone::CloneStrategy;
use crate::db;
use crate::environment::CloneRequest;
use crate::operation::{OperationLogger, PhaseResult};

/// Multi-step alternative to the bulk dump/restore path: wipe the target,
/// stream rows table by table, then recreate functions and triggers. Schema
/// differences are out of scope here; when schemas have drifted, use the bulk
/// strategy, which carries the schema with the dump.
pub struct GranularStrategy {
    deleter: Arc<dyn DataDeleter>,
    copier: Arc<dyn DataCopier>,
    batch_size: usize,
}

impl GranularStrategy {
    pub fn new(
        deleter: Arc<dyn DataDeleter>,
        copier: Arc<dyn DataCopier>,
        batch_size: usize,
    ) -> Self {
        Self {
            deleter,
            copier,
            batch_size,
        }
    }
}

#[async_trait]
impl CloneStrategy for GranularStrategy {
    fn name(&self) -> &'static str {
        "granular"
    }

    async fn execute(&self, request: &CloneRequest, logger: &OperationLogger) -> Result<PhaseResult> {
        // The operator explicitly requested a clone into this target, which
        // is the confirmation the deleter demands. Backup-before-delete is
        // handled by the orchestrator's own backup phase.
        let delete_options = DeleteOptions {
            create_backup: false,
            confirm_deletion: true,
        };
        let deleted = self
            .deleter
            .delete_all_data(
                &request.target.credentials,
                &request.target.name,
                &delete_options,
                logger,
            )
            .await?;
        if !deleted.success {
            bail!("target deletion failed: {}", deleted.errors.join("; "));
        }

        let copy_options = CopyOptions {
            batch_size: self.batch_size,
            anonymize_data: request.options.anonymize_data,
            preserve_timestamps: true,
        };
        let copied = self
            .copier
            .copy_all_data(
                &request.source.credentials,
                &request.target.credentials,
                &copy_options,
                logger,
            )
            .await?;
        if !copied.success {
            bail!("data copy failed: {}", copied.errors.join("; "));
        }

        let source = db::connect(&request.source.credentials)
            .await
            .context("Failed to connect to source for routine cloning")?;
        let target = db::connect(&request.target.credentials)
            .await
            .context("Failed to connect to target for routine cloning")?;
        let functions_cloned = copy_functions(&source, &target, logger).await?;
        let triggers_cloned = copy_triggers(&source, &target, logger).await?;

        let tables = copied.tables_copied.len() as u64;
        Ok(PhaseResult {
            tables_processed: tables,
            total_tables: tables,
            records_processed: copied.records_copied,
            total_records: copied.records_copied,
            functions_cloned,
            triggers_cloned,
            ..PhaseResult::default()
        })
    }
}

/// Recreate public-schema functions on the target. Individual failures are
/// logged and skipped; only reading the source definitions is fatal.
async fn copy_functions(source: &Client, target: &Client, logger: &OperationLogger) -> Result<u64> {
    let rows = source
        .query(
            "SELECT p.proname::text, pg_get_functiondef(p.oid) FROM pg_proc p \
             JOIN pg_namespace n ON n.oid = p.pronamespace \
             WHERE n.nspname = 'public' AND p.prokind = 'f'",
            &[],
        )
        .await
        .context("failed to read function definitions from source")?;

    let mut cloned = 0u64;
    for row in &rows {
        let name: String = row.get(0);
        let definition: String = row.get(1);
        match target.batch_execute(&definition).await {
            Ok(()) => cloned += 1,
            Err(err) => logger.warning(
                "functions",
                format!("could not recreate function '{}': {}", name, err),
            ),
        }
    }
    logger.info("functions", format!("Cloned {} functions", cloned));
    Ok(cloned)
}

/// Recreate user triggers on the target, dropping same-named ones first.
async fn copy_triggers(source: &Client, target: &Client, logger: &OperationLogger) -> Result<u64> {
    let rows = source
        .query(
            "SELECT t.tgname::text, c.relname::text, pg_get_triggerdef(t.oid) FROM pg_trigger t \
             JOIN pg_class c ON c.oid = t.tgrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = 'public' AND NOT t.tgisinternal",
            &[],
        )
        .await
        .context("failed to read trigger definitions from source")?;

    let mut cloned = 0u64;
    for row in &rows {
        let name: String = row.get(0);
        let table: String = row.get(1);
        let definition: String = row.get(2);
        let statement = format!(
            "DROP TRIGGER IF EXISTS {} ON {}; {}",
            db::quote_ident(&name),
            db::quote_ident(&table),
            definition
        );
        match target.batch_execute(&statement).await {
            Ok(()) => cloned += 1,
            Err(err) => logger.warning(
                "triggers",
                format!("could not recreate trigger '{}' on '{}': {}", name, table, err),
            ),
        }
    }
    logger.info("triggers", format!("Cloned {} triggers", cloned));
    Ok(cloned)
}
