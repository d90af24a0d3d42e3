// ABOUTME: In-memory operation registry guarding the single-flight flag and records
// ABOUTME: Also provides the per-operation bound logger handed to collaborators

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::error::CloneError;
use crate::operation::models::{
    CloneLog, CloneProgress, LogLevel, OperationStatus, PhaseResult,
};

struct RegistryInner {
    clone_in_progress: bool,
    operations: HashMap<String, CloneProgress>,
}

/// Shared state between the caller-facing orchestrator surface and the one
/// background task executing a clone. The single-flight flag and the
/// operation table live behind the same mutex so acceptance is atomic.
///
/// Critical sections never await and never panic: a poisoned lock is
/// recovered, since operation records stay readable after a worker panic.
pub struct OperationRegistry {
    inner: Mutex<RegistryInner>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                clone_in_progress: false,
                operations: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Atomically claim the single-flight slot and register a new pending
    /// record. Fails without side effects when another operation is active.
    pub fn begin(&self, record: CloneProgress) -> Result<(), CloneError> {
        let mut inner = self.lock();
        if inner.clone_in_progress {
            return Err(CloneError::CloneInProgress);
        }
        inner.clone_in_progress = true;
        inner.operations.insert(record.operation_id.clone(), record);
        Ok(())
    }

    /// Release the single-flight slot. Called exactly once per operation by
    /// the executor's top-level handler, after the terminal transition.
    pub fn release(&self) {
        self.lock().clone_in_progress = false;
    }

    pub fn is_busy(&self) -> bool {
        self.lock().clone_in_progress
    }

    /// Snapshot one operation record. Safe to call at any point during
    /// execution; returns a clone so callers never hold the lock.
    pub fn get(&self, operation_id: &str) -> Option<CloneProgress> {
        self.lock().operations.get(operation_id).cloned()
    }

    pub fn operation_count(&self) -> usize {
        self.lock().operations.len()
    }

    /// Set progress and status together, deriving the human-readable phase
    /// label. No-op once the record is terminal; progress never decreases.
    pub fn update_progress(&self, operation_id: &str, percent: u8, status: OperationStatus) {
        let mut inner = self.lock();
        if let Some(record) = inner.operations.get_mut(operation_id) {
            if record.is_terminal() {
                return;
            }
            record.progress = record.progress.max(percent.min(100));
            record.status = status;
            record.current_phase = status.phase_label().to_string();
        }
    }

    /// Append a log entry. Appends are allowed even after a terminal
    /// transition so in-flight phase logs are never dropped.
    pub fn append_log(&self, operation_id: &str, log: CloneLog) {
        let mut inner = self.lock();
        if let Some(record) = inner.operations.get_mut(operation_id) {
            record.logs.push(log);
        }
    }

    /// Merge a strategy's counters into the operation statistics. Counters
    /// only grow from zero, so overwriting keeps them monotonic.
    pub fn record_phase_result(&self, operation_id: &str, result: &PhaseResult) {
        let mut inner = self.lock();
        if let Some(record) = inner.operations.get_mut(operation_id) {
            if record.is_terminal() {
                return;
            }
            let stats = &mut record.statistics;
            stats.tables_processed = stats.tables_processed.max(result.tables_processed);
            stats.total_tables = stats.total_tables.max(result.total_tables);
            stats.records_processed = stats.records_processed.max(result.records_processed);
            stats.total_records = stats.total_records.max(result.total_records);
            stats.bytes_processed = stats.bytes_processed.max(result.bytes_processed);
            stats.total_bytes = stats.total_bytes.max(result.total_bytes);
            stats.functions_cloned = stats.functions_cloned.max(result.functions_cloned);
            stats.triggers_cloned = stats.triggers_cloned.max(result.triggers_cloned);
        }
    }

    /// Terminal transition: completed at 100%. No-op if already terminal.
    pub fn complete(&self, operation_id: &str) {
        self.finish(operation_id, OperationStatus::Completed, Some(100));
    }

    /// Terminal transition: failed, progress frozen where it was.
    pub fn fail(&self, operation_id: &str) {
        self.finish(operation_id, OperationStatus::Failed, None);
    }

    /// Cooperative cancellation. Returns true when the record transitioned,
    /// false when it was absent or already terminal.
    pub fn cancel(&self, operation_id: &str) -> bool {
        let mut inner = self.lock();
        match inner.operations.get_mut(operation_id) {
            Some(record) if !record.is_terminal() => {
                Self::seal(record, OperationStatus::Cancelled, None);
                true
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self, operation_id: &str) -> bool {
        self.lock()
            .operations
            .get(operation_id)
            .is_some_and(|record| record.status == OperationStatus::Cancelled)
    }

    fn finish(&self, operation_id: &str, status: OperationStatus, progress: Option<u8>) {
        let mut inner = self.lock();
        if let Some(record) = inner.operations.get_mut(operation_id) {
            if record.is_terminal() {
                return;
            }
            Self::seal(record, status, progress);
        }
    }

    fn seal(record: &mut CloneProgress, status: OperationStatus, progress: Option<u8>) {
        let completed_at = Utc::now();
        if let Some(percent) = progress {
            record.progress = record.progress.max(percent);
        }
        record.status = status;
        record.current_phase = status.phase_label().to_string();
        record.completed_at = Some(completed_at);
        record.statistics.duration_ms =
            Some((completed_at - record.started_at).num_milliseconds().max(0) as u64);
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Log sink bound to one operation id at construction time. Collaborators
/// receive a clone of this instead of reaching for "the active operation",
/// so log attribution stays unambiguous. Entries are mirrored to tracing.
#[derive(Clone)]
pub struct OperationLogger {
    registry: Arc<OperationRegistry>,
    operation_id: String,
}

impl OperationLogger {
    pub fn new(registry: Arc<OperationRegistry>, operation_id: impl Into<String>) -> Self {
        Self {
            registry,
            operation_id: operation_id.into(),
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn info(&self, phase: &str, message: impl Into<String>) {
        self.push(LogLevel::Info, phase, message.into());
    }

    pub fn success(&self, phase: &str, message: impl Into<String>) {
        self.push(LogLevel::Success, phase, message.into());
    }

    pub fn warning(&self, phase: &str, message: impl Into<String>) {
        self.push(LogLevel::Warning, phase, message.into());
    }

    pub fn error(&self, phase: &str, message: impl Into<String>) {
        self.push(LogLevel::Error, phase, message.into());
    }

    fn push(&self, level: LogLevel, phase: &str, message: String) {
        match level {
            LogLevel::Warning => {
                tracing::warn!(operation_id = %self.operation_id, phase, "{}", message)
            }
            LogLevel::Error => {
                tracing::error!(operation_id = %self.operation_id, phase, "{}", message)
            }
            _ => tracing::info!(operation_id = %self.operation_id, phase, "{}", message),
        }
        self.registry
            .append_log(&self.operation_id, CloneLog::new(level, phase, message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(id: &str) -> OperationRegistry {
        let registry = OperationRegistry::new();
        registry.begin(CloneProgress::new(id)).unwrap();
        registry
    }

    #[test]
    fn begin_rejects_while_another_operation_is_active() {
        let registry = registry_with("clone_1_aaaaaa");
        let err = registry.begin(CloneProgress::new("clone_2_bbbbbb")).unwrap_err();
        assert!(matches!(err, CloneError::CloneInProgress));
        // The rejected operation must leave no record behind.
        assert_eq!(registry.operation_count(), 1);
        assert!(registry.get("clone_2_bbbbbb").is_none());
    }

    #[test]
    fn begin_succeeds_again_after_release() {
        let registry = registry_with("clone_1_aaaaaa");
        registry.release();
        assert!(!registry.is_busy());
        registry.begin(CloneProgress::new("clone_2_bbbbbb")).unwrap();
        // Earlier records are retained for status queries.
        assert_eq!(registry.operation_count(), 2);
    }

    #[test]
    fn progress_never_decreases() {
        let registry = registry_with("op");
        registry.update_progress("op", 20, OperationStatus::BackingUp);
        registry.update_progress("op", 10, OperationStatus::Validating);
        let record = registry.get("op").unwrap();
        assert_eq!(record.progress, 20);
        // The status update still applies even when the percent is stale.
        assert_eq!(record.status, OperationStatus::Validating);
    }

    #[test]
    fn terminal_records_are_frozen_except_for_log_appends() {
        let registry = registry_with("op");
        registry.update_progress("op", 20, OperationStatus::CopyingData);
        assert!(registry.cancel("op"));

        registry.update_progress("op", 95, OperationStatus::CopyingData);
        registry.complete("op");
        registry.fail("op");
        let record = registry.get("op").unwrap();
        assert_eq!(record.status, OperationStatus::Cancelled);
        assert_eq!(record.progress, 20);
        assert!(record.completed_at.is_some());
        assert!(record.statistics.duration_ms.is_some());

        registry.append_log("op", CloneLog::new(LogLevel::Info, "clone", "late entry"));
        assert_eq!(registry.get("op").unwrap().logs.len(), 1);
    }

    #[test]
    fn cancel_is_a_no_op_on_terminal_or_unknown_operations() {
        let registry = registry_with("op");
        registry.complete("op");
        assert!(!registry.cancel("op"));
        assert!(!registry.cancel("missing"));
        assert_eq!(
            registry.get("op").unwrap().status,
            OperationStatus::Completed
        );
    }

    #[test]
    fn complete_pins_progress_to_100_and_records_duration() {
        let registry = registry_with("op");
        registry.update_progress("op", 95, OperationStatus::CopyingData);
        registry.complete("op");
        let record = registry.get("op").unwrap();
        assert_eq!(record.progress, 100);
        assert_eq!(record.status, OperationStatus::Completed);
        assert!(record.statistics.duration_ms.is_some());
    }

    #[test]
    fn phase_results_merge_into_statistics() {
        let registry = registry_with("op");
        registry.record_phase_result(
            "op",
            &PhaseResult {
                tables_processed: 12,
                total_tables: 12,
                records_processed: 3400,
                total_records: 3400,
                bytes_processed: 1_048_576,
                total_bytes: 1_048_576,
                functions_cloned: 3,
                triggers_cloned: 2,
            },
        );
        let stats = registry.get("op").unwrap().statistics;
        assert_eq!(stats.tables_processed, 12);
        assert_eq!(stats.records_processed, 3400);
        assert_eq!(stats.bytes_processed, 1_048_576);
        assert_eq!(stats.functions_cloned, 3);
        assert_eq!(stats.triggers_cloned, 2);
    }

    #[test]
    fn bound_logger_appends_in_order_with_levels() {
        let registry = Arc::new(registry_with("op"));
        let logger = OperationLogger::new(registry.clone(), "op");
        logger.info("validation", "starting");
        logger.warning("validation", "schema introspection unavailable");
        logger.error("clone", "pg_restore exited with status 1");

        let logs = registry.get("op").unwrap().logs;
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].level, LogLevel::Info);
        assert_eq!(logs[1].level, LogLevel::Warning);
        assert_eq!(logs[2].level, LogLevel::Error);
        assert_eq!(logs[2].phase, "clone");
        assert!(logs[0].timestamp <= logs[2].timestamp);
    }
}
