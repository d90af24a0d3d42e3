// ABOUTME: Operation tracking module
// ABOUTME: Records, registry, and per-operation logging for clone runs

pub mod models;
pub mod registry;

pub use models::{
    generate_operation_id, CloneLog, CloneProgress, CloneStatistics, LogLevel, OperationStatus,
    PhaseResult,
};
pub use registry::{OperationLogger, OperationRegistry};
