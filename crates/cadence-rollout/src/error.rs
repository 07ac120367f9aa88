use thiserror::Error;

use cadence_graph::GraphError;
use cadence_registry::RegistryError;

pub type RolloutResult<T> = Result<T, RolloutError>;

/// Failures that stop a release or rollback outright.
///
/// Per-service deploy and restore failures are not errors; they are
/// reported inside the returned result.
#[derive(Debug, Error)]
pub enum RolloutError {
    /// Unknown dependency, duplicate name, or cycle. Raised before any
    /// registry write.
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("no snapshot recorded for rollback {0}")]
    SnapshotNotFound(String),
}
