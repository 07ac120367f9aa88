//! Requests to and outcomes from the executor.

use serde::{Deserialize, Serialize};

use cadence_core::{HealthLevel, ServiceConfig};

/// One service deploy.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployRequest {
    pub service: String,
    pub environment: String,
    pub version: String,
    pub config: ServiceConfig,
}

/// What a deployer reports on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReceipt {
    /// Identifier minted by the deploy system, if it has one.
    #[serde(default)]
    pub deployment_id: Option<String>,
    #[serde(default)]
    pub health: Option<HealthLevel>,
}

/// Normalized result of a deploy call. Never an error: reported failures
/// and deadline overruns both land in `success = false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub service: String,
    pub success: bool,
    pub deployment_id: Option<String>,
    pub health: Option<HealthLevel>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Known-good state a service is restored to.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreTarget {
    pub deployment_id: String,
    pub version: String,
    pub config: ServiceConfig,
}

/// One service restore. A missing `target` means remove the service.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreRequest {
    pub service: String,
    pub environment: String,
    pub target: Option<RestoreTarget>,
    pub preserve_data: bool,
    /// Snapshot taken before the restore, when there is one.
    pub snapshot_id: Option<String>,
}

impl RestoreRequest {
    pub fn is_removal(&self) -> bool {
        self.target.is_none()
    }
}

/// Normalized result of a restore call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub service: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}
