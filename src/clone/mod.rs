// ABOUTME: Clone strategies and the data-movement plumbing they share
// ABOUTME: Exposes the CloneStrategy seam picked by the orchestrator

pub mod copier;
pub mod deleter;
pub mod granular;
pub mod pg_dump;

use anyhow::Result;
use async_trait::async_trait;

use crate::environment::CloneRequest;
use crate::operation::{OperationLogger, PhaseResult};

/// One way of moving an environment's data into another. The orchestrator
/// runs exactly one strategy per operation, between the backup and final
/// validation phases, and folds the returned counters into the operation's
/// statistics.
#[async_trait]
pub trait CloneStrategy: Send + Sync {
    /// Short identifier used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Perform the copy. Implementations report per-step progress through
    /// `logger` and must return an error rather than a partial success when
    /// the target may be left unusable.
    async fn execute(&self, request: &CloneRequest, logger: &OperationLogger)
        -> Result<PhaseResult>;
}

pub use copier::{CopyOptions, CopyResult, DataCopier, PostgresCopier};
pub use deleter::{DataDeleter, DeleteOptions, DeleteResult, PostgresDeleter};
pub use granular::GranularStrategy;
pub use pg_dump::{CloneDatabaseOptions, CloneResult, PgDumpCloner};
