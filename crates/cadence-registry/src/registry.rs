//! The `Registry` interface consumed by the coordinator and rollback manager.
//!
//! Implementors provide the primitive record operations; the history
//! queries ("latest", "previous", statistics) are derived from them so
//! every backend answers them the same way.

use crate::error::RegistryResult;
use crate::types::*;

/// Append/update store of deployment, release and rollback history.
///
/// Every write is a whole-record replace performed atomically; concurrent
/// writers never observe or produce a partially updated record. Inserting
/// an id that already exists fails with `RegistryError::Duplicate`.
pub trait Registry: Send + Sync {
    // ── Deployments ────────────────────────────────────────────────

    /// Append a deployment. Returns the stored record with its sequence.
    fn add_deployment(&self, record: &DeploymentRecord) -> RegistryResult<DeploymentRecord>;

    /// Move a deployment to `rolled-back`; the only mutation deployments allow.
    fn mark_deployment_rolled_back(&self, id: &str) -> RegistryResult<DeploymentRecord>;

    fn get_deployment(&self, id: &str) -> RegistryResult<Option<DeploymentRecord>>;

    /// All deployments in append order.
    fn list_deployments(&self) -> RegistryResult<Vec<DeploymentRecord>>;

    // ── Releases ───────────────────────────────────────────────────

    fn add_release(&self, record: &ReleaseRecord) -> RegistryResult<ReleaseRecord>;

    /// Apply a partial update as a single read-modify-write.
    fn update_release(&self, id: &str, update: &ReleaseUpdate) -> RegistryResult<ReleaseRecord>;

    fn get_release(&self, id: &str) -> RegistryResult<Option<ReleaseRecord>>;

    /// All releases in append order.
    fn list_releases(&self) -> RegistryResult<Vec<ReleaseRecord>>;

    // ── Rollbacks ──────────────────────────────────────────────────

    fn add_rollback(&self, entry: &RollbackEntry) -> RegistryResult<RollbackEntry>;

    fn get_rollback(&self, id: &str) -> RegistryResult<Option<RollbackEntry>>;

    /// All rollback entries in append order.
    fn list_rollbacks(&self) -> RegistryResult<Vec<RollbackEntry>>;

    /// Store the snapshot for a rollback. One snapshot per rollback id.
    fn put_snapshot(&self, snapshot: &RollbackSnapshot) -> RegistryResult<()>;

    fn get_snapshot(&self, rollback_id: &str) -> RegistryResult<Option<RollbackSnapshot>>;

    // ── Derived queries ────────────────────────────────────────────

    fn get_deployments_by_environment(&self, env: &str) -> RegistryResult<Vec<DeploymentRecord>> {
        Ok(self
            .list_deployments()?
            .into_iter()
            .filter(|d| d.environment == env)
            .collect())
    }

    /// Most recently appended deployment in `env`, whatever its status.
    fn get_latest_deployment(&self, env: &str) -> RegistryResult<Option<DeploymentRecord>> {
        Ok(self.get_deployments_by_environment(env)?.pop())
    }

    /// Second-most-recent successful deployment in `env`.
    fn get_previous_deployment(&self, env: &str) -> RegistryResult<Option<DeploymentRecord>> {
        Ok(self
            .get_deployments_by_environment(env)?
            .into_iter()
            .rev()
            .filter(DeploymentRecord::is_success)
            .nth(1))
    }

    /// Latest successful deployment of `service` in `env`, skipping
    /// deployments made by `exclude_release`.
    fn get_latest_service_deployment(
        &self,
        env: &str,
        service: &str,
        exclude_release: Option<&str>,
    ) -> RegistryResult<Option<DeploymentRecord>> {
        Ok(self
            .get_deployments_by_environment(env)?
            .into_iter()
            .rev()
            .filter(|d| d.is_success() && d.covers(service))
            .find(|d| exclude_release.is_none() || d.release_id.as_deref() != exclude_release))
    }

    fn get_releases_by_environment(&self, env: &str) -> RegistryResult<Vec<ReleaseRecord>> {
        Ok(self
            .list_releases()?
            .into_iter()
            .filter(|r| r.environment == env)
            .collect())
    }

    fn get_rollbacks_by_environment(&self, env: &str) -> RegistryResult<Vec<RollbackEntry>> {
        Ok(self
            .list_rollbacks()?
            .into_iter()
            .filter(|r| r.environment == env)
            .collect())
    }

    /// Aggregate counts over one environment, or all when `env` is `None`.
    fn get_statistics(&self, env: Option<&str>) -> RegistryResult<RegistryStatistics> {
        let in_scope = |e: &str| env.is_none_or(|want| want == e);

        let deployments: Vec<DeploymentRecord> = self
            .list_deployments()?
            .into_iter()
            .filter(|d| in_scope(&d.environment))
            .collect();
        let releases: Vec<ReleaseRecord> = self
            .list_releases()?
            .into_iter()
            .filter(|r| in_scope(&r.environment))
            .collect();
        let total_rollbacks = self
            .list_rollbacks()?
            .iter()
            .filter(|r| in_scope(&r.environment))
            .count();

        let count = |status: DeploymentStatus| {
            deployments.iter().filter(|d| d.status == status).count()
        };
        let successful = count(DeploymentStatus::Success);
        let failed = count(DeploymentStatus::Failed);
        let rolled_back = count(DeploymentStatus::RolledBack);
        let in_progress = count(DeploymentStatus::InProgress);

        let finished = deployments.len() - in_progress;
        let success_rate = if finished == 0 {
            0.0
        } else {
            successful as f64 / finished as f64
        };
        let average_duration_ms = if deployments.is_empty() {
            0
        } else {
            deployments.iter().map(|d| d.duration_ms).sum::<u64>() / deployments.len() as u64
        };

        let release_count = |status: ReleaseStatus| {
            releases.iter().filter(|r| r.status == status).count()
        };

        Ok(RegistryStatistics {
            environment: env.map(str::to_string),
            total_deployments: deployments.len(),
            successful_deployments: successful,
            failed_deployments: failed,
            rolled_back_deployments: rolled_back,
            in_progress_deployments: in_progress,
            success_rate,
            average_duration_ms,
            total_releases: releases.len(),
            successful_releases: release_count(ReleaseStatus::Success),
            failed_releases: release_count(ReleaseStatus::Failed),
            rolled_back_releases: release_count(ReleaseStatus::RolledBack),
            total_rollbacks,
            last_deployment_at: deployments.iter().map(|d| d.timestamp).max(),
        })
    }
}
