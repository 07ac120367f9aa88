//! Rollback manager.
//!
//! Validates a rollback target, snapshots the current state under the
//! rollback id, restores services one at a time, verifies them with the
//! health validator, and appends a rollback entry. Success is taken from
//! the post-restore verification, never from having run the restore.
//!
//! The same machinery compensates a failed release: each deployed service
//! is unwound to its last good deployment (or removed) in reverse order.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cadence_core::{epoch_millis, major_version, new_id};
use cadence_executor::{RestoreOutcome, RestoreRequest, RestoreTarget, ServiceExecutor};
use cadence_health::{HealthReport, HealthTarget, HealthValidator};
use cadence_registry::{
    CapturedService, DeploymentId, DeploymentRecord, Registry, RollbackEntry, RollbackId,
    RollbackSnapshot,
};

use crate::error::{RolloutError, RolloutResult};

/// Which deployment to roll back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackTarget {
    Deployment(DeploymentId),
    /// The second-most-recent successful deployment in the environment.
    LatestPrevious,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackRequest {
    pub environment: String,
    pub target: RollbackTarget,
    pub reason: String,
    /// Leave data stores untouched; only noted in the snapshot and entry.
    pub preserve_data: bool,
    /// Turn validation failures into warnings.
    pub force: bool,
    /// Plan and report without touching anything.
    pub dry_run: bool,
    /// Acknowledge that the target does not cover every current service.
    pub allow_service_gap: bool,
    /// Caller-chosen id; one is generated when absent.
    pub rollback_id: Option<RollbackId>,
}

impl RollbackRequest {
    pub fn new(environment: &str, target: RollbackTarget, reason: &str) -> Self {
        Self {
            environment: environment.to_string(),
            target,
            reason: reason.to_string(),
            preserve_data: true,
            force: false,
            dry_run: false,
            allow_service_gap: false,
            rollback_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackStatus {
    Completed,
    Failed,
    /// Validation blocked the rollback; nothing was touched.
    Rejected,
    DryRun,
}

/// One service a rollback would touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedRestore {
    pub service: String,
    pub from_version: Option<String>,
    /// `None` means the service would be removed.
    pub to_version: Option<String>,
}

/// What a dry run would have done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackPreview {
    /// Services whose state would be captured in the snapshot.
    pub snapshot_services: Vec<String>,
    pub restores: Vec<PlannedRestore>,
    pub preserve_data: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub rollback_id: RollbackId,
    pub environment: String,
    pub status: RollbackStatus,
    pub success: bool,
    pub from_deployment_id: Option<DeploymentId>,
    pub to_deployment_id: Option<DeploymentId>,
    pub services: Vec<RestoreOutcome>,
    pub health: Option<HealthReport>,
    pub snapshot_id: Option<RollbackId>,
    pub preview: Option<RollbackPreview>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// A service the coordinator deployed and may need to unwind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedService {
    pub service: String,
    pub deployment_id: DeploymentId,
}

/// A validated rollback ready to execute.
struct RollbackPlan {
    rollback_id: RollbackId,
    environment: String,
    reason: String,
    preserve_data: bool,
    from: Option<DeploymentRecord>,
    /// `None` removes the services.
    to: Option<DeploymentRecord>,
    services: Vec<String>,
    warnings: Vec<String>,
}

impl RollbackPlan {
    fn preview(&self) -> RollbackPreview {
        let from_version = self.from.as_ref().map(|d| d.version.clone());
        let restores = self
            .services
            .iter()
            .map(|service| PlannedRestore {
                service: service.clone(),
                from_version: from_version.clone(),
                to_version: self.to.as_ref().map(|d| d.version.clone()),
            })
            .collect();
        RollbackPreview {
            snapshot_services: self.services.clone(),
            restores,
            preserve_data: self.preserve_data,
        }
    }

    fn empty_result(&self, status: RollbackStatus, start: Instant) -> RollbackResult {
        RollbackResult {
            rollback_id: self.rollback_id.clone(),
            environment: self.environment.clone(),
            status,
            success: false,
            from_deployment_id: self.from.as_ref().map(|d| d.id.clone()),
            to_deployment_id: self.to.as_ref().map(|d| d.id.clone()),
            services: Vec::new(),
            health: None,
            snapshot_id: None,
            preview: None,
            warnings: self.warnings.clone(),
            errors: Vec::new(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Executes rollbacks against the injected registry and executor.
#[derive(Clone)]
pub struct RollbackManager {
    registry: Arc<dyn Registry>,
    executor: ServiceExecutor,
    validator: HealthValidator,
}

impl RollbackManager {
    pub fn new(
        registry: Arc<dyn Registry>,
        executor: ServiceExecutor,
        validator: HealthValidator,
    ) -> Self {
        Self {
            registry,
            executor,
            validator,
        }
    }

    /// Roll an environment back to a recorded deployment.
    ///
    /// Validation problems block the rollback (`Rejected`) unless `force` is
    /// set, in which case they are carried as warnings. Only registry
    /// failures and id reuse surface as `Err`.
    pub async fn rollback(&self, request: &RollbackRequest) -> RolloutResult<RollbackResult> {
        let start = Instant::now();
        let env = request.environment.as_str();
        let rollback_id = request.rollback_id.clone().unwrap_or_else(new_id);

        let target = match &request.target {
            RollbackTarget::Deployment(id) => self.registry.get_deployment(id)?,
            RollbackTarget::LatestPrevious => self.registry.get_previous_deployment(env)?,
        };

        let Some(target) = target else {
            let reason = match &request.target {
                RollbackTarget::Deployment(id) => format!("target deployment {id} not found"),
                RollbackTarget::LatestPrevious => {
                    format!("no previous successful deployment in {env}")
                }
            };
            warn!(environment = %env, %reason, "rollback rejected");
            let status = if request.dry_run {
                RollbackStatus::DryRun
            } else {
                RollbackStatus::Rejected
            };
            return Ok(RollbackResult {
                rollback_id,
                environment: env.to_string(),
                status,
                success: false,
                from_deployment_id: None,
                to_deployment_id: None,
                services: Vec::new(),
                health: None,
                snapshot_id: None,
                preview: None,
                warnings: Vec::new(),
                errors: vec![reason],
                duration_ms: start.elapsed().as_millis() as u64,
            });
        };

        let from = self
            .registry
            .get_deployments_by_environment(env)?
            .into_iter()
            .rev()
            .find(|d| d.id != target.id);

        let (issues, mut warnings) =
            assess(env, from.as_ref(), &target, request.allow_service_gap);
        let blocked = !issues.is_empty() && !request.force;
        if !blocked {
            warnings.extend(issues.iter().map(|i| format!("forced: {i}")));
        }

        let plan = RollbackPlan {
            rollback_id,
            environment: env.to_string(),
            reason: request.reason.clone(),
            preserve_data: request.preserve_data,
            services: target.services_deployed.clone(),
            from,
            to: Some(target),
            warnings,
        };

        if request.dry_run {
            let mut result = plan.empty_result(RollbackStatus::DryRun, start);
            result.success = !blocked;
            result.preview = Some(plan.preview());
            if blocked {
                result.errors = issues;
            }
            info!(
                rollback_id = %plan.rollback_id,
                environment = %env,
                blocked,
                warnings = result.warnings.len(),
                "rollback dry run"
            );
            return Ok(result);
        }

        if blocked {
            warn!(
                rollback_id = %plan.rollback_id,
                environment = %env,
                issues = ?issues,
                "rollback rejected"
            );
            let mut result = plan.empty_result(RollbackStatus::Rejected, start);
            result.errors = issues;
            return Ok(result);
        }

        self.execute(plan, start).await
    }

    /// Unwind the services of a failed release, strictly one at a time in
    /// reverse deployment order. Each service is rolled back to its latest
    /// successful deployment outside `release_id`, or removed when it has
    /// none. Validation issues never block: they become warnings.
    pub async fn compensate(
        &self,
        environment: &str,
        release_id: &str,
        deployed: &[DeployedService],
    ) -> RolloutResult<Vec<RollbackResult>> {
        let mut results = Vec::with_capacity(deployed.len());
        for item in deployed.iter().rev() {
            let start = Instant::now();
            let from = self.registry.get_deployment(&item.deployment_id)?;
            let to = self.registry.get_latest_service_deployment(
                environment,
                &item.service,
                Some(release_id),
            )?;

            let warnings = match &to {
                Some(to) => {
                    let (issues, mut acknowledged) = assess(environment, from.as_ref(), to, true);
                    acknowledged.extend(issues.into_iter().map(|i| format!("forced: {i}")));
                    acknowledged
                }
                None => vec![format!(
                    "{} has no earlier deployment in {environment}; removing it",
                    item.service
                )],
            };

            debug!(
                service = %item.service,
                to = ?to.as_ref().map(|d| d.id.as_str()),
                "compensating deployment"
            );

            let plan = RollbackPlan {
                rollback_id: new_id(),
                environment: environment.to_string(),
                reason: format!("compensating failed release {release_id}"),
                preserve_data: true,
                from,
                to,
                services: vec![item.service.clone()],
                warnings,
            };
            results.push(self.execute(plan, start).await?);
        }
        Ok(results)
    }

    /// Re-apply the state captured before `rollback_id` ran.
    ///
    /// The snapshot digest is verified first. The restoration is recorded
    /// as a new rollback entry pointing the other way.
    pub async fn restore_snapshot(&self, rollback_id: &str) -> RolloutResult<RollbackResult> {
        let start = Instant::now();
        let snapshot = self
            .registry
            .get_snapshot(rollback_id)?
            .ok_or_else(|| RolloutError::SnapshotNotFound(rollback_id.to_string()))?;
        snapshot.verify()?;

        let env = snapshot.environment.as_str();
        let restore_id = new_id();
        info!(%rollback_id, %restore_id, environment = %env, "restoring snapshot");

        let mut outcomes = Vec::with_capacity(snapshot.artifacts.len());
        let mut targets = Vec::new();
        let mut errors = Vec::new();
        for artifact in &snapshot.artifacts {
            let target = artifact.version.as_ref().map(|version| RestoreTarget {
                deployment_id: artifact.deployment_id.clone().unwrap_or_default(),
                version: version.clone(),
                config: artifact.config.clone(),
            });
            let request = RestoreRequest {
                service: artifact.service.clone(),
                environment: env.to_string(),
                target,
                preserve_data: snapshot.preserve_data,
                snapshot_id: Some(rollback_id.to_string()),
            };
            let outcome = self.executor.restore(&request).await;
            if outcome.success {
                if request.target.is_some() {
                    targets.push(HealthTarget::new(&artifact.service, artifact.config.clone()));
                }
            } else {
                errors.push(format!(
                    "restore of {} failed: {}",
                    artifact.service,
                    outcome.error.as_deref().unwrap_or("unknown error")
                ));
            }
            outcomes.push(outcome);
        }

        let report = self.validator.validate(env, &targets).await;
        let restored = errors.is_empty();
        if restored && !report.is_healthy() {
            errors.push(format!("post-restore health check reported {}", report.status));
        }
        let success = errors.is_empty();

        let entry = RollbackEntry {
            rollback_id: restore_id.clone(),
            environment: env.to_string(),
            from_deployment_id: snapshot.to_deployment_id.clone(),
            to_deployment_id: snapshot.from_deployment_id.clone(),
            reason: format!("restore snapshot {rollback_id}"),
            timestamp: epoch_millis(),
            success,
            preserve_data: snapshot.preserve_data,
            services: snapshot.artifacts.iter().map(|a| a.service.clone()).collect(),
            warnings: Vec::new(),
            sequence: 0,
        };
        self.registry.add_rollback(&entry)?;

        Ok(RollbackResult {
            rollback_id: restore_id,
            environment: env.to_string(),
            status: if success {
                RollbackStatus::Completed
            } else {
                RollbackStatus::Failed
            },
            success,
            from_deployment_id: entry.from_deployment_id,
            to_deployment_id: entry.to_deployment_id,
            services: outcomes,
            health: Some(report),
            snapshot_id: Some(rollback_id.to_string()),
            preview: None,
            warnings: Vec::new(),
            errors,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Snapshot, restore, verify, record.
    async fn execute(&self, plan: RollbackPlan, start: Instant) -> RolloutResult<RollbackResult> {
        let env = plan.environment.as_str();
        info!(
            rollback_id = %plan.rollback_id,
            environment = %env,
            services = ?plan.services,
            to = ?plan.to.as_ref().map(|d| d.id.as_str()),
            "executing rollback"
        );

        // Write-ahead: capture and persist state before any restore.
        let mut artifacts = Vec::with_capacity(plan.services.len());
        for service in &plan.services {
            let current = self.registry.get_latest_service_deployment(env, service, None)?;
            match self.executor.capture(env, service).await {
                Ok(state) => artifacts.push(CapturedService {
                    service: service.clone(),
                    deployment_id: current.as_ref().map(|d| d.id.clone()),
                    version: current.as_ref().map(|d| d.version.clone()),
                    config: current.map(|d| d.config).unwrap_or_default(),
                    state,
                }),
                Err(e) => {
                    let error = format!("capturing {service} failed, nothing was restored: {e}");
                    warn!(rollback_id = %plan.rollback_id, %service, error = %e, "snapshot capture failed");
                    self.record(&plan, false)?;
                    let mut result = plan.empty_result(RollbackStatus::Failed, start);
                    result.errors.push(error);
                    return Ok(result);
                }
            }
        }

        let snapshot = RollbackSnapshot::new(
            &plan.rollback_id,
            epoch_millis(),
            env,
            plan.from.as_ref().map(|d| d.id.clone()),
            plan.to.as_ref().map(|d| d.id.clone()),
            plan.preserve_data,
            artifacts,
        )?;
        self.registry.put_snapshot(&snapshot)?;

        let mut outcomes = Vec::with_capacity(plan.services.len());
        let mut targets = Vec::new();
        let mut errors = Vec::new();
        for (i, service) in plan.services.iter().enumerate() {
            let request = RestoreRequest {
                service: service.clone(),
                environment: env.to_string(),
                target: plan.to.as_ref().map(|to| RestoreTarget {
                    deployment_id: to.id.clone(),
                    version: to.version.clone(),
                    config: to.config.clone(),
                }),
                preserve_data: plan.preserve_data,
                snapshot_id: Some(plan.rollback_id.clone()),
            };
            let outcome = self.executor.restore(&request).await;
            let ok = outcome.success;
            if ok {
                if let Some(to) = &plan.to {
                    targets.push(HealthTarget::new(service, to.config.clone()));
                }
            } else {
                errors.push(format!(
                    "restore of {service} failed: {}",
                    outcome.error.as_deref().unwrap_or("unknown error")
                ));
            }
            outcomes.push(outcome);
            if !ok {
                let untouched = &plan.services[i + 1..];
                if !untouched.is_empty() {
                    errors.push(format!("not attempted: {}", untouched.join(", ")));
                }
                break;
            }
        }

        let report = self.validator.validate(env, &targets).await;
        if errors.is_empty() && !report.is_healthy() {
            errors.push(format!("post-rollback health check reported {}", report.status));
        }
        let success = errors.is_empty();
        self.record(&plan, success)?;

        if success {
            info!(rollback_id = %plan.rollback_id, environment = %env, "rollback completed");
        } else {
            warn!(rollback_id = %plan.rollback_id, environment = %env, errors = ?errors, "rollback failed");
        }

        let mut result = plan.empty_result(
            if success {
                RollbackStatus::Completed
            } else {
                RollbackStatus::Failed
            },
            start,
        );
        result.success = success;
        result.services = outcomes;
        result.health = Some(report);
        result.snapshot_id = Some(plan.rollback_id.clone());
        result.errors = errors;
        Ok(result)
    }

    fn record(&self, plan: &RollbackPlan, success: bool) -> RolloutResult<()> {
        let entry = RollbackEntry {
            rollback_id: plan.rollback_id.clone(),
            environment: plan.environment.clone(),
            from_deployment_id: plan.from.as_ref().map(|d| d.id.clone()),
            to_deployment_id: plan.to.as_ref().map(|d| d.id.clone()),
            reason: plan.reason.clone(),
            timestamp: epoch_millis(),
            success,
            preserve_data: plan.preserve_data,
            services: plan.services.clone(),
            warnings: plan.warnings.clone(),
            sequence: 0,
        };
        self.registry.add_rollback(&entry)?;
        Ok(())
    }
}

/// Validate a rollback from `from` to `to`.
///
/// Returns `(issues, warnings)`: issues block unless forced, warnings never do.
fn assess(
    env: &str,
    from: Option<&DeploymentRecord>,
    to: &DeploymentRecord,
    allow_service_gap: bool,
) -> (Vec<String>, Vec<String>) {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    if to.environment != env {
        issues.push(format!(
            "target deployment {} belongs to environment {}",
            to.id, to.environment
        ));
    }
    if !to.is_success() {
        issues.push(format!(
            "target deployment {} has status {}, expected success",
            to.id, to.status
        ));
    }

    let Some(from) = from else {
        return (issues, warnings);
    };

    let shared = from
        .services_deployed
        .iter()
        .any(|s| to.services_deployed.contains(s));
    if shared && major_version(&from.version) != major_version(&to.version) {
        issues.push(format!(
            "major version changes from {} to {}; schema may be incompatible",
            from.version, to.version
        ));
    }

    let target_services: BTreeSet<&str> = to.services_deployed.iter().map(String::as_str).collect();
    let gap: Vec<&str> = from
        .services_deployed
        .iter()
        .map(String::as_str)
        .filter(|s| !target_services.contains(s))
        .collect();
    if !gap.is_empty() {
        let message = format!(
            "target deployment {} does not cover running services: {}",
            to.id,
            gap.join(", ")
        );
        if allow_service_gap {
            warnings.push(message);
        } else {
            issues.push(message);
        }
    }

    (issues, warnings)
}
