//! Release coordinator: drives one release from declarations to a final
//! registry record.
//!
//! ```text
//! validate ─▶ plan ─▶ record in-progress ─▶ batch 1 ─▶ … ─▶ batch N ─▶ record final
//!                                              │ failure
//!                                              ▼
//!                              compensate (reverse order, one at a time)
//! ```
//!
//! Batch N+1 never starts before every member of batch N has reported.
//! The release record is written twice: once before the first deploy and
//! once, as a single update, when the outcome is known.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use cadence_core::{
    DeployStrategy, HealthLevel, ServiceDeclaration, ServiceName, epoch_millis, new_id,
};
use cadence_executor::{DeployOutcome, DeployRequest, ServiceExecutor};
use cadence_graph::{BatchPlan, DependencyGraph};
use cadence_health::{HealthReport, HealthTarget, HealthValidator};
use cadence_registry::{
    DeploymentRecord, DeploymentStatus, Registry, RegistryError, ReleaseId, ReleaseRecord,
    ReleaseStatus, ReleaseUpdate, ServiceResult, ServiceStatus,
};

use crate::error::RolloutResult;
use crate::notes;
use crate::rollback::{DeployedService, RollbackManager, RollbackResult};
use crate::strategy::shape_batches;

#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseRequest {
    pub environment: String,
    pub release_name: String,
    pub services: Vec<ServiceDeclaration>,
    pub strategy: DeployStrategy,
    pub rollback_on_failure: bool,
    /// Recorded only; delivery happens elsewhere.
    pub notify_channels: Vec<String>,
    /// Caller-chosen id; the registry rejects reuse.
    pub release_id: Option<ReleaseId>,
    /// Deadline for each service deploy. Overrides the executor's.
    pub deploy_timeout: Option<Duration>,
}

impl ReleaseRequest {
    pub fn new(environment: &str, release_name: &str, services: Vec<ServiceDeclaration>) -> Self {
        Self {
            environment: environment.to_string(),
            release_name: release_name.to_string(),
            services,
            strategy: DeployStrategy::default(),
            rollback_on_failure: true,
            notify_channels: Vec::new(),
            release_id: None,
            deploy_timeout: None,
        }
    }

    pub fn with_strategy(mut self, strategy: DeployStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_rollback_on_failure(mut self, enabled: bool) -> Self {
        self.rollback_on_failure = enabled;
        self
    }
}

/// Summary of a finished release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseResult {
    pub release_id: ReleaseId,
    pub release_name: String,
    pub environment: String,
    pub strategy: DeployStrategy,
    pub status: ReleaseStatus,
    pub success: bool,
    pub deployed: usize,
    pub failed: usize,
    pub rolled_back: usize,
    /// Services never started because an earlier batch failed.
    pub skipped: Vec<ServiceName>,
    pub duration_ms: u64,
    pub deployment_order: Vec<ServiceName>,
    pub batches: Vec<Vec<ServiceName>>,
    pub service_results: Vec<ServiceResult>,
    pub overall_health: HealthLevel,
    /// Post-release validation, run when every service deployed.
    pub health_report: Option<HealthReport>,
    /// Compensating rollbacks, in the order they ran.
    pub rollbacks: Vec<RollbackResult>,
    pub release_notes_path: Option<String>,
    pub notify_channels: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Coordinates releases against an injected registry, executor and validator.
#[derive(Clone)]
pub struct ReleaseCoordinator {
    registry: Arc<dyn Registry>,
    executor: ServiceExecutor,
    validator: HealthValidator,
    rollback: RollbackManager,
    notes_dir: Option<PathBuf>,
}

impl ReleaseCoordinator {
    pub fn new(
        registry: Arc<dyn Registry>,
        executor: ServiceExecutor,
        validator: HealthValidator,
    ) -> Self {
        let rollback = RollbackManager::new(registry.clone(), executor.clone(), validator.clone());
        Self {
            registry,
            executor,
            validator,
            rollback,
            notes_dir: None,
        }
    }

    /// Directory release notes are written into.
    pub fn with_notes_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.notes_dir = dir;
        self
    }

    pub fn rollback_manager(&self) -> &RollbackManager {
        &self.rollback
    }

    /// Run a release end to end.
    ///
    /// Graph validation and cycle detection happen before anything is
    /// written; they return `Err` with the diagnostic. Deploy failures are
    /// reported in the result. A registry failure returns `Err` even after
    /// deploys have run, since the outcome could not be recorded; services
    /// already deployed are compensated first when rollback is enabled.
    pub async fn coordinate_release(
        &self,
        request: ReleaseRequest,
    ) -> RolloutResult<ReleaseResult> {
        let start = Instant::now();
        let env = request.environment.clone();

        let graph = DependencyGraph::build(&request.services).inspect_err(|e| {
            error!(environment = %env, release = %request.release_name, error = %e, "release validation failed");
        })?;
        let plan = BatchPlan::compute_acyclic(&graph).inspect_err(|e| {
            error!(environment = %env, release = %request.release_name, error = %e, "release has dependency cycles");
        })?;
        let batches = shape_batches(request.strategy, &graph, &plan);
        let deployment_order: Vec<ServiceName> = batches.concat();

        let release_id = request.release_id.clone().unwrap_or_else(new_id);
        let initial = ReleaseRecord {
            release_id: release_id.clone(),
            release_name: request.release_name.clone(),
            environment: env.clone(),
            timestamp: epoch_millis(),
            status: ReleaseStatus::InProgress,
            strategy: request.strategy,
            services: graph.names().to_vec(),
            deployment_order: deployment_order.clone(),
            batches: batches.clone(),
            service_results: Vec::new(),
            duration_ms: 0,
            overall_health: None,
            release_notes_path: None,
            notify_channels: request.notify_channels.clone(),
            sequence: 0,
            revision: 0,
        };
        let created = self.registry.add_release(&initial)?;

        info!(
            release_id = %release_id,
            release = %request.release_name,
            environment = %env,
            strategy = %request.strategy,
            batches = batches.len(),
            services = deployment_order.len(),
            "release started"
        );

        let run = ReleaseRun {
            coordinator: self,
            request: &request,
            graph: &graph,
            release_id: &release_id,
            executor: self
                .executor
                .clone()
                .with_deadline(request.deploy_timeout.or(self.executor.deadline())),
        };

        match run.execute(&batches, &deployment_order, created.revision, start).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!(release_id = %release_id, error = %e, "release aborted by registry failure");
                let close = ReleaseUpdate {
                    status: Some(ReleaseStatus::Failed),
                    duration_ms: Some(start.elapsed().as_millis() as u64),
                    ..Default::default()
                };
                if let Err(close_err) = self.registry.update_release(&release_id, &close) {
                    warn!(release_id = %release_id, error = %close_err, "could not close release record");
                }
                Err(e)
            }
        }
    }
}

/// State shared by the steps of one release.
struct ReleaseRun<'a> {
    coordinator: &'a ReleaseCoordinator,
    request: &'a ReleaseRequest,
    graph: &'a DependencyGraph,
    release_id: &'a str,
    executor: ServiceExecutor,
}

impl ReleaseRun<'_> {
    async fn execute(
        &self,
        batches: &[Vec<ServiceName>],
        deployment_order: &[ServiceName],
        revision: u64,
        start: Instant,
    ) -> RolloutResult<ReleaseResult> {
        let env = self.request.environment.as_str();
        let registry = &self.coordinator.registry;

        let mut results: Vec<ServiceResult> = Vec::with_capacity(deployment_order.len());
        let mut deployed: Vec<DeployedService> = Vec::new();
        let mut skipped: Vec<ServiceName> = Vec::new();
        let mut failed = false;
        let mut write_error: Option<RegistryError> = None;

        for (index, batch) in batches.iter().enumerate() {
            if failed || write_error.is_some() {
                skipped.extend(batch.iter().cloned());
                continue;
            }
            debug!(release_id = %self.release_id, batch = index + 1, members = ?batch, "deploying batch");

            // Every outcome of the batch is accounted for even after a write
            // fails: those services are live either way.
            for outcome in self.deploy_batch(batch).await {
                let record = self.deployment_record(&outcome);
                if write_error.is_none()
                    && let Err(e) = registry.add_deployment(&record)
                {
                    error!(
                        release_id = %self.release_id,
                        service = %outcome.service,
                        error = %e,
                        "failed to record deployment"
                    );
                    write_error = Some(e);
                }
                if outcome.success {
                    deployed.push(DeployedService {
                        service: outcome.service.clone(),
                        deployment_id: record.id.clone(),
                    });
                } else {
                    failed = true;
                }
                results.push(ServiceResult {
                    service: outcome.service.clone(),
                    status: if outcome.success {
                        ServiceStatus::Success
                    } else {
                        ServiceStatus::Failed
                    },
                    deployment_id: Some(record.id),
                    version: record.version,
                    duration_ms: outcome.duration_ms,
                    health_status: outcome.health,
                    error: outcome.error,
                });
            }

            if failed {
                warn!(
                    release_id = %self.release_id,
                    batch = index + 1,
                    "batch failed, halting release"
                );
            }
        }

        if let Some(e) = write_error {
            self.unwind_unrecorded(&deployed).await;
            return Err(e.into());
        }

        let mut warnings = Vec::new();
        let mut errors: Vec<String> = results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {e}", r.service)))
            .collect();

        let mut rollbacks = Vec::new();
        if failed && self.request.rollback_on_failure && !deployed.is_empty() {
            info!(
                release_id = %self.release_id,
                services = deployed.len(),
                "compensating deployed services"
            );
            rollbacks = self
                .coordinator
                .rollback
                .compensate(env, self.release_id, &deployed)
                .await?;

            for (item, rollback) in deployed.iter().rev().zip(&rollbacks) {
                let Some(result) = results.iter_mut().find(|r| r.service == item.service) else {
                    continue;
                };
                warnings.extend(rollback.warnings.iter().map(|w| format!("{}: {w}", item.service)));
                if rollback.success {
                    registry.mark_deployment_rolled_back(&item.deployment_id)?;
                    result.status = ServiceStatus::RolledBack;
                } else {
                    let detail = rollback.errors.join("; ");
                    errors.push(format!("{}: rollback failed: {detail}", item.service));
                    result.status = ServiceStatus::Failed;
                    result.error = Some(format!("rollback failed: {detail}"));
                }
            }
        }

        let succeeded = results
            .iter()
            .filter(|r| r.status == ServiceStatus::Success)
            .count();
        let rolled_back = results
            .iter()
            .filter(|r| r.status == ServiceStatus::RolledBack)
            .count();
        let failed_count = results
            .iter()
            .filter(|r| r.status == ServiceStatus::Failed)
            .count();
        let overall_health = HealthLevel::from_ratio(succeeded, results.len());

        let status = if !failed {
            ReleaseStatus::Success
        } else if !rollbacks.is_empty() && rollbacks.iter().all(|r| r.success) {
            ReleaseStatus::RolledBack
        } else {
            ReleaseStatus::Failed
        };

        let health_report = if failed {
            None
        } else {
            let targets: Vec<HealthTarget> = deployment_order
                .iter()
                .filter_map(|name| self.graph.get(name))
                .map(|decl| HealthTarget::new(&decl.name, decl.config.clone()))
                .collect();
            let report = self.coordinator.validator.validate(env, &targets).await;
            if !report.is_healthy() {
                warnings.push(format!(
                    "post-release health check reported {} (failed: {})",
                    report.status,
                    report.failed_checks().join(", ")
                ));
            }
            Some(report)
        };

        let mut result = ReleaseResult {
            release_id: self.release_id.to_string(),
            release_name: self.request.release_name.clone(),
            environment: env.to_string(),
            strategy: self.request.strategy,
            status,
            success: status == ReleaseStatus::Success,
            deployed: succeeded,
            failed: failed_count,
            rolled_back,
            skipped,
            duration_ms: start.elapsed().as_millis() as u64,
            deployment_order: deployment_order.to_vec(),
            batches: batches.to_vec(),
            service_results: results,
            overall_health,
            health_report,
            rollbacks,
            release_notes_path: None,
            notify_channels: self.request.notify_channels.clone(),
            warnings,
            errors,
        };

        if let Some(dir) = &self.coordinator.notes_dir {
            match notes::write(dir, &result).await {
                Ok(path) => result.release_notes_path = Some(path.display().to_string()),
                Err(e) => {
                    warn!(release_id = %self.release_id, error = %e, "failed to write release notes");
                    result.warnings.push(format!("release notes not written: {e}"));
                }
            }
        }

        let update = ReleaseUpdate {
            status: Some(status),
            service_results: Some(result.service_results.clone()),
            duration_ms: Some(result.duration_ms),
            overall_health: Some(overall_health),
            release_notes_path: result.release_notes_path.clone(),
            expected_revision: Some(revision),
        };
        registry.update_release(self.release_id, &update)?;

        info!(
            release_id = %self.release_id,
            status = %status,
            deployed = result.deployed,
            failed = result.failed,
            rolled_back = result.rolled_back,
            skipped = result.skipped.len(),
            health = %overall_health,
            duration_ms = result.duration_ms,
            "release finished"
        );
        Ok(result)
    }

    /// Best-effort compensation when the registry stops accepting writes
    /// mid-release. The release still returns the write error.
    async fn unwind_unrecorded(&self, deployed: &[DeployedService]) {
        if !self.request.rollback_on_failure || deployed.is_empty() {
            return;
        }
        warn!(
            release_id = %self.release_id,
            services = deployed.len(),
            "registry write failed, compensating deployed services"
        );
        let env = self.request.environment.as_str();
        let registry = &self.coordinator.registry;
        match self
            .coordinator
            .rollback
            .compensate(env, self.release_id, deployed)
            .await
        {
            Ok(rollbacks) => {
                for (item, rollback) in deployed.iter().rev().zip(&rollbacks) {
                    if !rollback.success {
                        warn!(service = %item.service, errors = ?rollback.errors, "compensation failed");
                        continue;
                    }
                    if let Err(e) = registry.mark_deployment_rolled_back(&item.deployment_id) {
                        debug!(service = %item.service, error = %e, "deployment left unmarked");
                    }
                }
            }
            Err(e) => {
                error!(release_id = %self.release_id, error = %e, "compensation did not complete");
            }
        }
    }

    /// Deploy every member of a batch and wait for all of them.
    ///
    /// Outcomes come back in batch order regardless of completion order.
    async fn deploy_batch(&self, batch: &[ServiceName]) -> Vec<DeployOutcome> {
        let requests: Vec<DeployRequest> = batch
            .iter()
            .filter_map(|name| self.graph.get(name))
            .map(|decl| DeployRequest {
                service: decl.name.clone(),
                environment: self.request.environment.clone(),
                version: decl.version.clone(),
                config: decl.config.clone(),
            })
            .collect();

        if !self.request.strategy.is_concurrent() || requests.len() < 2 {
            let mut outcomes = Vec::with_capacity(requests.len());
            for request in &requests {
                outcomes.push(self.executor.deploy(request).await);
            }
            return outcomes;
        }

        let mut set = JoinSet::new();
        let mut slots = HashMap::with_capacity(requests.len());
        for (i, request) in requests.iter().enumerate() {
            let executor = self.executor.clone();
            let request = request.clone();
            let handle = set.spawn(async move { executor.deploy(&request).await });
            slots.insert(handle.id(), i);
        }

        let mut outcomes: Vec<Option<DeployOutcome>> = vec![None; requests.len()];
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    if let Some(&i) = slots.get(&id) {
                        outcomes[i] = Some(outcome);
                    }
                }
                Err(e) => {
                    if let Some(&i) = slots.get(&e.id()) {
                        warn!(service = %requests[i].service, error = %e, "deploy task aborted");
                        outcomes[i] = Some(DeployOutcome {
                            service: requests[i].service.clone(),
                            success: false,
                            deployment_id: None,
                            health: None,
                            duration_ms: 0,
                            error: Some(format!("deploy task aborted: {e}")),
                        });
                    }
                }
            }
        }
        outcomes.into_iter().flatten().collect()
    }

    fn deployment_record(&self, outcome: &DeployOutcome) -> DeploymentRecord {
        let decl = self.graph.get(&outcome.service);
        DeploymentRecord {
            id: new_id(),
            external_id: outcome.deployment_id.clone(),
            environment: self.request.environment.clone(),
            strategy: self.request.strategy,
            version: decl.map(|d| d.version.clone()).unwrap_or_default(),
            timestamp: epoch_millis(),
            status: if outcome.success {
                DeploymentStatus::Success
            } else {
                DeploymentStatus::Failed
            },
            services_deployed: vec![outcome.service.clone()],
            duration_ms: outcome.duration_ms,
            health_status: outcome.health,
            rollback_available: outcome.success,
            release_id: Some(self.release_id.to_string()),
            config: decl.map(|d| d.config.clone()).unwrap_or_default(),
            sequence: 0,
            revision: 0,
        }
    }
}
