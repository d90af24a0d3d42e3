// ABOUTME: Custom error types for the environment cloner
// ABOUTME: Distinguishes the fatal production-safety error from retryable failures

use std::fmt;

#[derive(Debug)]
pub enum CloneError {
    /// The target environment name matched a protected production pattern.
    /// Never retried; the operation aborts before any mutation.
    ProductionProtection(String),
    /// Another clone operation is already running (single-flight violation).
    CloneInProgress,
    Validation(String),
    Connection(String),
    Backup(String),
    Strategy(String),
    OperationNotFound(String),
}

impl fmt::Display for CloneError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CloneError::ProductionProtection(name) => write!(
                f,
                "PRODUCTION PROTECTION: refusing to clone into '{}' - target name matches a protected production pattern",
                name
            ),
            CloneError::CloneInProgress => {
                write!(f, "A clone operation is already in progress")
            }
            CloneError::Validation(msg) => write!(f, "Validation error: {}", msg),
            CloneError::Connection(msg) => write!(f, "Connection error: {}", msg),
            CloneError::Backup(msg) => write!(f, "Backup error: {}", msg),
            CloneError::Strategy(msg) => write!(f, "Clone strategy error: {}", msg),
            CloneError::OperationNotFound(id) => {
                write!(f, "No operation found with id '{}'", id)
            }
        }
    }
}

impl std::error::Error for CloneError {}
