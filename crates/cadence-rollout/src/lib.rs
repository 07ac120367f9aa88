//! cadence-rollout: release coordination and rollback for Cadence.
//!
//! [`ReleaseCoordinator`] validates a release's dependency graph, shapes
//! batches per [`DeployStrategy`](cadence_core::DeployStrategy), deploys
//! them through the executor, and unwinds on failure. [`RollbackManager`]
//! rolls an environment back to a recorded deployment, snapshotting first
//! and verifying after.

pub mod coordinator;
pub mod error;
pub mod notes;
pub mod rollback;
pub mod strategy;

pub use coordinator::{ReleaseCoordinator, ReleaseRequest, ReleaseResult};
pub use error::{RolloutError, RolloutResult};
pub use rollback::{
    DeployedService, PlannedRestore, RollbackManager, RollbackPreview, RollbackRequest,
    RollbackResult, RollbackStatus, RollbackTarget,
};
pub use strategy::shape_batches;
