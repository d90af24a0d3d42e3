// ABOUTME: Data structures tracking one clone operation over its lifetime
// ABOUTME: Status machine, phase labels, structured logs, and statistics counters

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;

/// Lifecycle status of a clone operation. Final validation runs under
/// `CopyingData`; it does not get a status of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Validating,
    BackingUp,
    CopyingData,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    /// Terminal statuses never transition again; their records are frozen
    /// except for log appends already in flight.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }

    /// Human-readable phase label shown to operators polling an operation.
    pub fn phase_label(self) -> &'static str {
        match self {
            OperationStatus::Pending => "Waiting to start",
            OperationStatus::Validating => "Validating connections",
            OperationStatus::BackingUp => "Creating target backup",
            OperationStatus::CopyingData => "Copying data",
            OperationStatus::Completed => "Clone completed",
            OperationStatus::Failed => "Clone failed",
            OperationStatus::Cancelled => "Cancelled",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Validating => "validating",
            OperationStatus::BackingUp => "backing_up",
            OperationStatus::CopyingData => "copying_data",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// One append-only log entry. Insertion order is chronological order.
#[derive(Debug, Clone, Serialize)]
pub struct CloneLog {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub phase: String,
    pub message: String,
}

impl CloneLog {
    pub fn new(level: LogLevel, phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            phase: phase.into(),
            message: message.into(),
        }
    }
}

/// Monotonically-updated counters for one operation. `duration_ms` is filled
/// when the operation reaches a terminal status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CloneStatistics {
    pub tables_processed: u64,
    pub total_tables: u64,
    pub records_processed: u64,
    pub total_records: u64,
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub functions_cloned: u64,
    pub triggers_cloned: u64,
    pub duration_ms: Option<u64>,
}

/// Counters a clone strategy hands back to the orchestrator for merging into
/// the operation's statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseResult {
    pub tables_processed: u64,
    pub total_tables: u64,
    pub records_processed: u64,
    pub total_records: u64,
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub functions_cloned: u64,
    pub triggers_cloned: u64,
}

/// The full runtime record for one clone operation, retained in memory for
/// the process lifetime and queryable throughout execution.
#[derive(Debug, Clone, Serialize)]
pub struct CloneProgress {
    pub operation_id: String,
    pub status: OperationStatus,
    /// 0-100, non-decreasing for the lifetime of the operation.
    pub progress: u8,
    pub current_phase: String,
    pub statistics: CloneStatistics,
    pub logs: Vec<CloneLog>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CloneProgress {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            status: OperationStatus::Pending,
            progress: 0,
            current_phase: OperationStatus::Pending.phase_label().to_string(),
            statistics: CloneStatistics::default(),
            logs: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Generate an operation id unique for the process lifetime: unix millis plus
/// a short random suffix, e.g. `clone_1724580000123_x4k9qa`.
pub fn generate_operation_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!(
        "clone_{}_{}",
        Utc::now().timestamp_millis(),
        suffix.to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_exactly_completed_failed_cancelled() {
        assert!(OperationStatus::Completed.is_terminal());
        assert!(OperationStatus::Failed.is_terminal());
        assert!(OperationStatus::Cancelled.is_terminal());
        assert!(!OperationStatus::Pending.is_terminal());
        assert!(!OperationStatus::Validating.is_terminal());
        assert!(!OperationStatus::BackingUp.is_terminal());
        assert!(!OperationStatus::CopyingData.is_terminal());
    }

    #[test]
    fn phase_labels_are_human_readable() {
        assert_eq!(
            OperationStatus::Validating.phase_label(),
            "Validating connections"
        );
        assert_eq!(OperationStatus::CopyingData.phase_label(), "Copying data");
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let json = serde_json::to_string(&OperationStatus::CopyingData).unwrap();
        assert_eq!(json, "\"copying_data\"");
        let json = serde_json::to_string(&OperationStatus::BackingUp).unwrap();
        assert_eq!(json, "\"backing_up\"");
    }

    #[test]
    fn operation_ids_have_the_expected_shape_and_do_not_collide() {
        let a = generate_operation_id();
        let b = generate_operation_id();
        assert!(a.starts_with("clone_"));
        assert_ne!(a, b);

        let suffix = a.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(suffix.to_lowercase(), suffix);
    }

    #[test]
    fn new_progress_record_starts_pending_and_empty() {
        let progress = CloneProgress::new("clone_1_abc");
        assert_eq!(progress.status, OperationStatus::Pending);
        assert_eq!(progress.progress, 0);
        assert!(progress.logs.is_empty());
        assert!(progress.completed_at.is_none());
        assert_eq!(progress.statistics.bytes_processed, 0);
        assert!(!progress.is_terminal());
    }
}
