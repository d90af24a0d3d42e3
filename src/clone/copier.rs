// ABOUTME: Granular-path data copier: batched COPY streaming between environments
// ABOUTME: Optional deterministic anonymization and timestamp re-stamping per row

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{pin_mut, SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use tokio_postgres::Client;

use crate::db;
use crate::environment::EnvironmentCredentials;
use crate::operation::OperationLogger;

const LOG_PHASE: &str = "copy";
/// COPY text-format NULL marker.
const NULL_FIELD: &str = "\\N";

#[derive(Debug, Clone, Copy)]
pub struct CopyOptions {
    /// Rows buffered per write to the target; bounds memory for wide tables.
    pub batch_size: usize,
    pub anonymize_data: bool,
    /// Keep source-side created/updated timestamps instead of stamping rows
    /// with the copy time.
    pub preserve_timestamps: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            anonymize_data: false,
            preserve_timestamps: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CopyResult {
    pub success: bool,
    pub tables_copied: Vec<String>,
    pub records_copied: u64,
    pub errors: Vec<String>,
}

/// Row transfer seam consumed by the granular strategy.
#[async_trait]
pub trait DataCopier: Send + Sync {
    async fn copy_all_data(
        &self,
        source: &EnvironmentCredentials,
        target: &EnvironmentCredentials,
        options: &CopyOptions,
        logger: &OperationLogger,
    ) -> Result<CopyResult>;
}

/// Streams every public table from source to target with text-mode COPY.
/// A failing table is recorded and the remaining tables still copy, so the
/// result attributes exactly what moved and what did not.
pub struct PostgresCopier;

impl PostgresCopier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PostgresCopier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataCopier for PostgresCopier {
    async fn copy_all_data(
        &self,
        source: &EnvironmentCredentials,
        target: &EnvironmentCredentials,
        options: &CopyOptions,
        logger: &OperationLogger,
    ) -> Result<CopyResult> {
        let source_client = db::connect(source)
            .await
            .context("Failed to connect to source for copy")?;
        let target_client = db::connect(target)
            .await
            .context("Failed to connect to target for copy")?;

        // Tables copy in name order, not dependency order, so FK checks must
        // be deferred for this session. Not every role may do this; without
        // it, copies into tables with cross-references can fail.
        if let Err(err) = target_client
            .batch_execute("SET session_replication_role = 'replica'")
            .await
        {
            logger.warning(
                LOG_PHASE,
                format!("could not relax FK enforcement on target: {}", err),
            );
        }

        let tables = db::list_public_tables(&source_client).await?;
        logger.info(
            LOG_PHASE,
            format!("Copying {} tables in batches of {}", tables.len(), options.batch_size),
        );

        let mut result = CopyResult::default();
        for table in &tables {
            let rewriter = match build_rewriter(&source_client, table, options).await {
                Ok(rewriter) => rewriter,
                Err(err) => {
                    result.errors.push(format!("{}: {:#}", table, err));
                    continue;
                }
            };

            match copy_table(
                &source_client,
                &target_client,
                table,
                rewriter.as_ref(),
                options.batch_size,
            )
            .await
            {
                Ok(rows) => {
                    logger.info(LOG_PHASE, format!("Copied {} rows into '{}'", rows, table));
                    result.records_copied += rows;
                    result.tables_copied.push(table.clone());
                }
                Err(err) => {
                    logger.error(LOG_PHASE, format!("copy of '{}' failed: {:#}", table, err));
                    result.errors.push(format!("{}: {:#}", table, err));
                }
            }
        }

        result.success = result.errors.is_empty();
        Ok(result)
    }
}

/// Stream one table. Without a rewriter the raw COPY chunks pass straight
/// through; with one, rows are rewritten line by line and flushed to the
/// target every `batch_size` rows.
async fn copy_table(
    source: &Client,
    target: &Client,
    table: &str,
    rewriter: Option<&RowRewriter>,
    batch_size: usize,
) -> Result<u64> {
    let quoted = db::quote_ident(table);
    let out = source
        .copy_out(format!("COPY {} TO STDOUT", quoted).as_str())
        .await
        .context("COPY OUT failed on source")?;
    let sink = target
        .copy_in(format!("COPY {} FROM STDIN", quoted).as_str())
        .await
        .context("COPY IN failed on target")?;
    pin_mut!(out);
    pin_mut!(sink);

    match rewriter {
        None => {
            while let Some(chunk) = out.next().await {
                let chunk = chunk.context("error streaming rows from source")?;
                sink.send(chunk)
                    .await
                    .context("error streaming rows into target")?;
            }
        }
        Some(rewriter) => {
            let mut buffer: Vec<u8> = Vec::new();
            let mut batch = String::new();
            let mut batched_rows = 0usize;
            while let Some(chunk) = out.next().await {
                let chunk = chunk.context("error streaming rows from source")?;
                buffer.extend_from_slice(&chunk);

                while let Some(newline) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let row = std::str::from_utf8(&line[..line.len() - 1])
                        .context("table contains non-UTF-8 row data")?;
                    batch.push_str(&rewriter.rewrite_row(row));
                    batch.push('\n');
                    batched_rows += 1;

                    if batched_rows >= batch_size {
                        sink.send(Bytes::from(std::mem::take(&mut batch)))
                            .await
                            .context("error streaming rows into target")?;
                        batched_rows = 0;
                    }
                }
            }
            if !batch.is_empty() {
                sink.send(Bytes::from(batch))
                    .await
                    .context("error streaming rows into target")?;
            }
        }
    }

    let rows = sink.finish().await.context("COPY into target failed")?;
    Ok(rows)
}

/// Build the per-table rewrite plan, or `None` when rows can pass through
/// untouched.
async fn build_rewriter(
    source: &Client,
    table: &str,
    options: &CopyOptions,
) -> Result<Option<RowRewriter>> {
    if options.preserve_timestamps && !options.anonymize_data {
        return Ok(None);
    }

    let rows = source
        .query(
            "SELECT column_name::text, data_type::text FROM information_schema.columns \
             WHERE table_schema = 'public' AND table_name = $1 ORDER BY ordinal_position",
            &[&table],
        )
        .await
        .context("failed to read column metadata")?;

    let mut actions = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.get(0);
        let data_type: String = row.get(1);
        actions.push(plan_column(&name, &data_type, options));
    }

    if actions.iter().all(|action| matches!(action, ColumnAction::Keep)) {
        return Ok(None);
    }
    Ok(Some(RowRewriter::new(actions)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnAction {
    Keep,
    /// Replace with the copy-time timestamp.
    Stamp,
    Anonymize(SensitiveKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensitiveKind {
    Email,
    Name,
    Phone,
    FreeText,
}

fn plan_column(name: &str, data_type: &str, options: &CopyOptions) -> ColumnAction {
    let lower = name.to_lowercase();

    if !options.preserve_timestamps
        && (lower == "created_at" || lower == "updated_at")
        && data_type.starts_with("timestamp")
    {
        return ColumnAction::Stamp;
    }

    if options.anonymize_data && is_text_type(data_type) && !is_key_like(&lower) {
        if let Some(kind) = sensitive_kind(&lower) {
            return ColumnAction::Anonymize(kind);
        }
    }

    ColumnAction::Keep
}

fn is_text_type(data_type: &str) -> bool {
    matches!(data_type, "text" | "character varying" | "character" | "citext")
}

/// Key columns are never rewritten: anonymizing a value that participates in
/// a join would sever referential linkage.
fn is_key_like(name: &str) -> bool {
    name == "id" || name.ends_with("_id") || name.ends_with("_key") || name == "uuid"
}

fn sensitive_kind(name: &str) -> Option<SensitiveKind> {
    if name.contains("email") {
        return Some(SensitiveKind::Email);
    }
    if name.contains("phone") || name.contains("mobile") || name == "tel" {
        return Some(SensitiveKind::Phone);
    }
    if name == "name" || name.ends_with("_name") {
        return Some(SensitiveKind::Name);
    }
    let financial_or_address = ["address", "street", "iban", "bank_account", "account_number", "tax_id"];
    if financial_or_address.iter().any(|marker| name.contains(marker)) {
        return Some(SensitiveKind::FreeText);
    }
    None
}

/// Rewrites COPY text-format rows field by field according to the column
/// plan. COPY escapes literal tabs and newlines inside values, so splitting
/// on `\t` is exact.
struct RowRewriter {
    actions: Vec<ColumnAction>,
    stamp: String,
}

impl RowRewriter {
    fn new(actions: Vec<ColumnAction>) -> Self {
        Self {
            actions,
            stamp: chrono::Utc::now()
                .format("%Y-%m-%d %H:%M:%S%.6f+00")
                .to_string(),
        }
    }

    fn rewrite_row(&self, row: &str) -> String {
        let fields: Vec<&str> = row.split('\t').collect();
        let mut rewritten = Vec::with_capacity(fields.len());
        for (index, field) in fields.iter().enumerate() {
            let action = self.actions.get(index).copied().unwrap_or(ColumnAction::Keep);
            if *field == NULL_FIELD {
                rewritten.push(field.to_string());
                continue;
            }
            match action {
                ColumnAction::Keep => rewritten.push(field.to_string()),
                ColumnAction::Stamp => rewritten.push(self.stamp.clone()),
                ColumnAction::Anonymize(kind) => rewritten.push(synthesize(kind, field)),
            }
        }
        rewritten.join("\t")
    }
}

/// Deterministic synthetic replacement: the same input always maps to the
/// same output, so values that link rows across tables keep linking them.
fn synthesize(kind: SensitiveKind, original: &str) -> String {
    let digest = short_hash(original);
    match kind {
        SensitiveKind::Email => format!("user-{}@example.invalid", digest),
        SensitiveKind::Name => format!("Anon {}", digest),
        SensitiveKind::Phone => format!("+490000{}", digits_from(&digest)),
        SensitiveKind::FreeText => format!("REDACTED-{}", digest),
    }
}

fn short_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest
        .iter()
        .take(4)
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

fn digits_from(hex: &str) -> String {
    hex.bytes()
        .map(|b| char::from(b'0' + (b % 10)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anonymizing() -> CopyOptions {
        CopyOptions {
            batch_size: 100,
            anonymize_data: true,
            preserve_timestamps: true,
        }
    }

    #[test]
    fn key_columns_are_never_anonymized() {
        let options = anonymizing();
        assert_eq!(plan_column("id", "text", &options), ColumnAction::Keep);
        assert_eq!(plan_column("guest_id", "text", &options), ColumnAction::Keep);
        assert_eq!(plan_column("booking_key", "text", &options), ColumnAction::Keep);
    }

    #[test]
    fn sensitive_text_columns_get_anonymized() {
        let options = anonymizing();
        assert_eq!(
            plan_column("email", "text", &options),
            ColumnAction::Anonymize(SensitiveKind::Email)
        );
        assert_eq!(
            plan_column("contact_phone", "character varying", &options),
            ColumnAction::Anonymize(SensitiveKind::Phone)
        );
        assert_eq!(
            plan_column("guest_name", "text", &options),
            ColumnAction::Anonymize(SensitiveKind::Name)
        );
        assert_eq!(
            plan_column("billing_address", "text", &options),
            ColumnAction::Anonymize(SensitiveKind::FreeText)
        );
    }

    #[test]
    fn non_text_and_insensitive_columns_pass_through() {
        let options = anonymizing();
        // An integer "phone_count" style column must never be rewritten.
        assert_eq!(plan_column("email", "integer", &options), ColumnAction::Keep);
        assert_eq!(plan_column("price", "numeric", &options), ColumnAction::Keep);
        assert_eq!(plan_column("description", "text", &options), ColumnAction::Keep);
    }

    #[test]
    fn timestamps_are_stamped_only_when_not_preserved() {
        let preserve = CopyOptions {
            batch_size: 100,
            anonymize_data: false,
            preserve_timestamps: true,
        };
        assert_eq!(
            plan_column("created_at", "timestamp with time zone", &preserve),
            ColumnAction::Keep
        );

        let stamp = CopyOptions {
            preserve_timestamps: false,
            ..preserve
        };
        assert_eq!(
            plan_column("created_at", "timestamp with time zone", &stamp),
            ColumnAction::Stamp
        );
        assert_eq!(
            plan_column("updated_at", "timestamp without time zone", &stamp),
            ColumnAction::Stamp
        );
        // Only the well-known audit columns are stamped.
        assert_eq!(
            plan_column("check_in_at", "timestamp with time zone", &stamp),
            ColumnAction::Keep
        );
    }

    #[test]
    fn anonymization_is_deterministic_and_shape_preserving() {
        let a = synthesize(SensitiveKind::Email, "alice@rentals.example");
        let b = synthesize(SensitiveKind::Email, "alice@rentals.example");
        let c = synthesize(SensitiveKind::Email, "bob@rentals.example");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with("@example.invalid"));

        let phone = synthesize(SensitiveKind::Phone, "+49 171 555 0175");
        assert!(phone.starts_with('+'));
        assert!(phone[1..].chars().all(|ch| ch.is_ascii_digit()));
    }

    #[test]
    fn rewriter_replaces_planned_fields_and_keeps_nulls() {
        let rewriter = RowRewriter::new(vec![
            ColumnAction::Keep,
            ColumnAction::Anonymize(SensitiveKind::Email),
            ColumnAction::Anonymize(SensitiveKind::Name),
        ]);
        let row = "42\talice@rentals.example\t\\N";
        let rewritten = rewriter.rewrite_row(row);
        let fields: Vec<&str> = rewritten.split('\t').collect();
        assert_eq!(fields[0], "42");
        assert!(fields[1].ends_with("@example.invalid"));
        assert_eq!(fields[2], "\\N");
    }

    #[test]
    fn rewriter_stamps_timestamp_fields() {
        let rewriter = RowRewriter::new(vec![ColumnAction::Keep, ColumnAction::Stamp]);
        let rewritten = rewriter.rewrite_row("7\t2021-01-01 00:00:00+00");
        let fields: Vec<&str> = rewritten.split('\t').collect();
        assert_eq!(fields[0], "7");
        assert_ne!(fields[1], "2021-01-01 00:00:00+00");
        assert_eq!(fields[1], rewriter.stamp);
    }
}
