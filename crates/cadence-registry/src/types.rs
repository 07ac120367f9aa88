//! Records kept by the registry.
//!
//! Deployment, release and rollback history is append-only: records are
//! written once, and only the status fields documented on each type may
//! change afterwards. Every record is JSON-serialized into a redb table.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use cadence_core::{DeployStrategy, HealthLevel, ServiceConfig};

use crate::error::{RegistryError, RegistryResult};

pub type DeploymentId = String;
pub type ReleaseId = String;
pub type RollbackId = String;

// ── Deployment ─────────────────────────────────────────────────────

/// Status of a single service deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentStatus {
    Success,
    Failed,
    RolledBack,
    InProgress,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled-back",
            DeploymentStatus::InProgress => "in-progress",
        })
    }
}

/// One deployment of one service to an environment.
///
/// Immutable after write except for the `status` transition to
/// `rolled-back`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Registry key, always generated by the coordinator.
    pub id: DeploymentId,
    /// Id reported by the deployer, if any. Not required to be unique.
    #[serde(default)]
    pub external_id: Option<String>,
    pub environment: String,
    pub strategy: DeployStrategy,
    pub version: String,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
    pub status: DeploymentStatus,
    pub services_deployed: Vec<String>,
    pub duration_ms: u64,
    pub health_status: Option<HealthLevel>,
    /// Whether an earlier successful deployment exists to roll back to.
    pub rollback_available: bool,
    #[serde(default)]
    pub release_id: Option<ReleaseId>,
    #[serde(default)]
    pub config: ServiceConfig,
    /// Append order, assigned by the registry.
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub revision: u64,
}

impl DeploymentRecord {
    pub fn covers(&self, service: &str) -> bool {
        self.services_deployed.iter().any(|s| s == service)
    }

    pub fn is_success(&self) -> bool {
        self.status == DeploymentStatus::Success
    }
}

// ── Release ────────────────────────────────────────────────────────

/// Lifecycle of a release. Only `in-progress → terminal` is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    InProgress,
    Success,
    Failed,
    RolledBack,
}

impl ReleaseStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReleaseStatus::InProgress)
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReleaseStatus::InProgress => "in-progress",
            ReleaseStatus::Success => "success",
            ReleaseStatus::Failed => "failed",
            ReleaseStatus::RolledBack => "rolled-back",
        })
    }
}

/// Final status of one service within a release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceStatus {
    Success,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResult {
    pub service: String,
    pub status: ServiceStatus,
    pub deployment_id: Option<DeploymentId>,
    pub version: String,
    pub duration_ms: u64,
    pub health_status: Option<HealthLevel>,
    /// Deploy or rollback failure detail.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub release_id: ReleaseId,
    pub release_name: String,
    pub environment: String,
    pub timestamp: u64,
    pub status: ReleaseStatus,
    pub strategy: DeployStrategy,
    pub services: Vec<String>,
    pub deployment_order: Vec<String>,
    #[serde(default)]
    pub batches: Vec<Vec<String>>,
    #[serde(default)]
    pub service_results: Vec<ServiceResult>,
    pub duration_ms: u64,
    pub overall_health: Option<HealthLevel>,
    pub release_notes_path: Option<String>,
    /// Channels the caller asked to notify; delivery happens elsewhere.
    #[serde(default)]
    pub notify_channels: Vec<String>,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub revision: u64,
}

/// Partial update applied to a release as one whole-record replace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleaseUpdate {
    pub status: Option<ReleaseStatus>,
    pub service_results: Option<Vec<ServiceResult>>,
    pub duration_ms: Option<u64>,
    pub overall_health: Option<HealthLevel>,
    pub release_notes_path: Option<String>,
    /// Compare-and-swap guard against the stored revision.
    pub expected_revision: Option<u64>,
}

impl ReleaseUpdate {
    pub(crate) fn apply(&self, record: &mut ReleaseRecord) -> RegistryResult<()> {
        if record.status.is_terminal() {
            return Err(RegistryError::InvalidTransition {
                id: record.release_id.clone(),
                from: record.status.to_string(),
                to: self
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| record.status.to_string()),
            });
        }
        if let Some(status) = self.status {
            if !status.is_terminal() {
                return Err(RegistryError::InvalidTransition {
                    id: record.release_id.clone(),
                    from: record.status.to_string(),
                    to: status.to_string(),
                });
            }
            record.status = status;
        }
        if let Some(results) = &self.service_results {
            record.service_results = results.clone();
        }
        if let Some(duration) = self.duration_ms {
            record.duration_ms = duration;
        }
        if let Some(health) = self.overall_health {
            record.overall_health = Some(health);
        }
        if let Some(path) = &self.release_notes_path {
            record.release_notes_path = Some(path.clone());
        }
        record.revision += 1;
        Ok(())
    }
}

// ── Rollback ───────────────────────────────────────────────────────

/// Append-only history entry linking the state rolled back from and to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub rollback_id: RollbackId,
    pub environment: String,
    pub from_deployment_id: Option<DeploymentId>,
    /// `None` when the services were removed because no earlier
    /// deployment existed.
    pub to_deployment_id: Option<DeploymentId>,
    pub reason: String,
    pub timestamp: u64,
    pub success: bool,
    pub preserve_data: bool,
    pub services: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub sequence: u64,
}

/// State of one service captured before a rollback touches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedService {
    pub service: String,
    pub deployment_id: Option<DeploymentId>,
    pub version: Option<String>,
    pub config: ServiceConfig,
    /// Opaque runtime state reported by the restorer.
    pub state: serde_json::Value,
}

/// Everything needed to undo a rollback, stored under its rollback id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackSnapshot {
    pub rollback_id: RollbackId,
    pub timestamp: u64,
    pub environment: String,
    pub from_deployment_id: Option<DeploymentId>,
    pub to_deployment_id: Option<DeploymentId>,
    pub preserve_data: bool,
    pub artifacts: Vec<CapturedService>,
    /// Hex SHA-256 of the serialized artifacts.
    pub digest: String,
}

impl RollbackSnapshot {
    /// Build a snapshot and seal its digest.
    pub fn new(
        rollback_id: &str,
        timestamp: u64,
        environment: &str,
        from_deployment_id: Option<DeploymentId>,
        to_deployment_id: Option<DeploymentId>,
        preserve_data: bool,
        artifacts: Vec<CapturedService>,
    ) -> RegistryResult<Self> {
        let digest = artifacts_digest(&artifacts)?;
        Ok(Self {
            rollback_id: rollback_id.to_string(),
            timestamp,
            environment: environment.to_string(),
            from_deployment_id,
            to_deployment_id,
            preserve_data,
            artifacts,
            digest,
        })
    }

    /// Check the artifacts still match the sealed digest.
    pub fn verify(&self) -> RegistryResult<()> {
        let actual = artifacts_digest(&self.artifacts)?;
        if actual != self.digest {
            return Err(RegistryError::Integrity(format!(
                "snapshot {} digest mismatch",
                self.rollback_id
            )));
        }
        Ok(())
    }
}

fn artifacts_digest(artifacts: &[CapturedService]) -> RegistryResult<String> {
    let bytes =
        serde_json::to_vec(artifacts).map_err(|e| RegistryError::Serialize(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

// ── Statistics ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStatistics {
    /// `None` when computed across all environments.
    pub environment: Option<String>,
    pub total_deployments: usize,
    pub successful_deployments: usize,
    pub failed_deployments: usize,
    pub rolled_back_deployments: usize,
    pub in_progress_deployments: usize,
    /// Successful deployments over finished ones, 0.0–1.0.
    pub success_rate: f64,
    pub average_duration_ms: u64,
    pub total_releases: usize,
    pub successful_releases: usize,
    pub failed_releases: usize,
    pub rolled_back_releases: usize,
    pub total_rollbacks: usize,
    pub last_deployment_at: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn release(status: ReleaseStatus) -> ReleaseRecord {
        ReleaseRecord {
            release_id: "rel-1".to_string(),
            release_name: "spring".to_string(),
            environment: "prod".to_string(),
            timestamp: 1000,
            status,
            strategy: DeployStrategy::DependencyOrder,
            services: vec!["api".to_string()],
            deployment_order: vec!["api".to_string()],
            batches: vec![vec!["api".to_string()]],
            service_results: Vec::new(),
            duration_ms: 0,
            overall_health: None,
            release_notes_path: None,
            notify_channels: Vec::new(),
            sequence: 0,
            revision: 0,
        }
    }

    #[test]
    fn update_moves_in_progress_to_terminal() {
        let mut record = release(ReleaseStatus::InProgress);
        let update = ReleaseUpdate {
            status: Some(ReleaseStatus::Success),
            duration_ms: Some(42),
            overall_health: Some(HealthLevel::Healthy),
            ..Default::default()
        };
        update.apply(&mut record).unwrap();
        assert_eq!(record.status, ReleaseStatus::Success);
        assert_eq!(record.duration_ms, 42);
        assert_eq!(record.revision, 1);
    }

    #[test]
    fn terminal_release_cannot_change() {
        let mut record = release(ReleaseStatus::Failed);
        let update = ReleaseUpdate {
            status: Some(ReleaseStatus::Success),
            ..Default::default()
        };
        assert!(matches!(
            update.apply(&mut record),
            Err(RegistryError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn cannot_move_back_to_in_progress() {
        let mut record = release(ReleaseStatus::InProgress);
        let update = ReleaseUpdate {
            status: Some(ReleaseStatus::InProgress),
            ..Default::default()
        };
        assert!(update.apply(&mut record).is_err());
    }

    #[test]
    fn snapshot_digest_detects_tampering() {
        let mut snapshot = RollbackSnapshot::new(
            "rb-1",
            1000,
            "prod",
            Some("dep-2".to_string()),
            Some("dep-1".to_string()),
            true,
            vec![CapturedService {
                service: "api".to_string(),
                deployment_id: Some("dep-2".to_string()),
                version: Some("2.0.0".to_string()),
                config: ServiceConfig::Empty,
                state: json!({"replicas": 3}),
            }],
        )
        .unwrap();
        assert!(snapshot.verify().is_ok());

        snapshot.artifacts[0].version = Some("9.9.9".to_string());
        assert!(matches!(snapshot.verify(), Err(RegistryError::Integrity(_))));
    }

    #[test]
    fn statuses_use_kebab_case() {
        assert_eq!(
            serde_json::to_string(&DeploymentStatus::RolledBack).unwrap(),
            "\"rolled-back\""
        );
        assert_eq!(ReleaseStatus::InProgress.to_string(), "in-progress");
        assert!(!ReleaseStatus::InProgress.is_terminal());
    }
}
