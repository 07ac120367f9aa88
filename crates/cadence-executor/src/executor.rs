//! Collaborator traits and the deadline-enforcing [`ServiceExecutor`].

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use cadence_core::BoxFuture;

use crate::error::{ExecutorError, ExecutorResult};
use crate::request::*;

/// Deploys one service. Potentially slow, potentially failing.
pub trait ServiceDeployer: Send + Sync {
    fn deploy<'a>(
        &'a self,
        request: &'a DeployRequest,
    ) -> BoxFuture<'a, ExecutorResult<DeployReceipt>>;
}

/// Stop/restore/start mechanics for one service during an unwind.
pub trait ServiceRestorer: Send + Sync {
    /// Capture the live state of a service before it is touched.
    fn capture<'a>(
        &'a self,
        environment: &'a str,
        service: &'a str,
    ) -> BoxFuture<'a, ExecutorResult<serde_json::Value>>;

    /// Restore a service to `request.target`, or remove it when there is none.
    fn restore<'a>(&'a self, request: &'a RestoreRequest) -> BoxFuture<'a, ExecutorResult<()>>;
}

/// Wraps the collaborators with an optional per-call deadline and
/// normalizes their results.
///
/// Cheap to clone; the coordinator hands a clone to every task in a batch.
#[derive(Clone)]
pub struct ServiceExecutor {
    deployer: Arc<dyn ServiceDeployer>,
    restorer: Arc<dyn ServiceRestorer>,
    deadline: Option<Duration>,
}

impl ServiceExecutor {
    pub fn new(deployer: Arc<dyn ServiceDeployer>, restorer: Arc<dyn ServiceRestorer>) -> Self {
        Self {
            deployer,
            restorer,
            deadline: None,
        }
    }

    /// Deadline applied to each deploy, capture and restore call.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub async fn deploy(&self, request: &DeployRequest) -> DeployOutcome {
        let start = Instant::now();
        debug!(
            service = %request.service,
            environment = %request.environment,
            version = %request.version,
            "deploying service"
        );

        let result = self.bounded(self.deployer.deploy(request)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(receipt) => {
                info!(
                    service = %request.service,
                    version = %request.version,
                    duration_ms,
                    "service deployed"
                );
                DeployOutcome {
                    service: request.service.clone(),
                    success: true,
                    deployment_id: receipt.deployment_id,
                    health: receipt.health,
                    duration_ms,
                    error: None,
                }
            }
            Err(e) => {
                warn!(service = %request.service, error = %e, duration_ms, "service deploy failed");
                DeployOutcome {
                    service: request.service.clone(),
                    success: false,
                    deployment_id: None,
                    health: None,
                    duration_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn capture(
        &self,
        environment: &str,
        service: &str,
    ) -> ExecutorResult<serde_json::Value> {
        self.bounded(self.restorer.capture(environment, service)).await
    }

    pub async fn restore(&self, request: &RestoreRequest) -> RestoreOutcome {
        let start = Instant::now();
        let action = if request.is_removal() { "remove" } else { "restore" };
        debug!(service = %request.service, environment = %request.environment, action, "restoring service");

        let result = self.bounded(self.restorer.restore(request)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                info!(service = %request.service, action, duration_ms, "service restored");
                RestoreOutcome {
                    service: request.service.clone(),
                    success: true,
                    duration_ms,
                    error: None,
                }
            }
            Err(e) => {
                warn!(service = %request.service, action, error = %e, "service restore failed");
                RestoreOutcome {
                    service: request.service.clone(),
                    success: false,
                    duration_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = ExecutorResult<T>>) -> ExecutorResult<T> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, fut)
                .await
                .unwrap_or(Err(ExecutorError::Timeout(deadline))),
            None => fut.await,
        }
    }
}
