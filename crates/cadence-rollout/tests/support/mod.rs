//! Recording fakes shared by the rollout integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_core::BoxFuture;
use cadence_executor::*;
use cadence_health::{HealthProbe, HealthValidator};
use cadence_registry::*;
use cadence_rollout::{ReleaseCoordinator, RollbackManager};

/// Deployer/restorer that records every call in order.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<String>>,
    pub fail_deploy: HashSet<String>,
    pub fail_restore: HashSet<String>,
    pub fail_capture: HashSet<String>,
    pub delay: Duration,
    /// Deployment id reported in every receipt.
    pub receipt_id: Option<String>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_deploy(mut self, services: &[&str]) -> Self {
        self.fail_deploy = services.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn failing_restore(mut self, services: &[&str]) -> Self {
        self.fail_restore = services.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn failing_capture(mut self, services: &[&str]) -> Self {
        self.fail_capture = services.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_receipt_id(mut self, id: &str) -> Self {
        self.receipt_id = Some(id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Events with the given prefix, e.g. `"deploy:"`.
    pub fn events_with(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl ServiceDeployer for Recorder {
    fn deploy<'a>(
        &'a self,
        request: &'a DeployRequest,
    ) -> BoxFuture<'a, ExecutorResult<DeployReceipt>> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.push(format!("deploy:{}", request.service));
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_deploy.contains(&request.service) {
                self.push(format!("failed:{}", request.service));
                return Err(ExecutorError::Failed(format!("{} crashed", request.service)));
            }
            self.push(format!("deployed:{}", request.service));
            Ok(DeployReceipt {
                deployment_id: self.receipt_id.clone(),
                ..Default::default()
            })
        })
    }
}

impl ServiceRestorer for Recorder {
    fn capture<'a>(
        &'a self,
        _environment: &'a str,
        service: &'a str,
    ) -> BoxFuture<'a, ExecutorResult<serde_json::Value>> {
        Box::pin(async move {
            self.push(format!("capture:{service}"));
            if self.fail_capture.contains(service) {
                return Err(ExecutorError::Failed("capture unavailable".to_string()));
            }
            Ok(serde_json::json!({ "service": service }))
        })
    }

    fn restore<'a>(&'a self, request: &'a RestoreRequest) -> BoxFuture<'a, ExecutorResult<()>> {
        Box::pin(async move {
            let to = request
                .target
                .as_ref()
                .map_or("none".to_string(), |t| t.version.clone());
            self.push(format!("restore:{}@{to}", request.service));
            if self.fail_restore.contains(&request.service) {
                return Err(ExecutorError::Failed("restore refused".to_string()));
            }
            Ok(())
        })
    }
}

/// Probe with a switchable set of dead services.
#[derive(Default)]
pub struct Probe {
    pub down: Mutex<HashSet<String>>,
    pub calls: AtomicUsize,
    pub not_ready: AtomicBool,
}

impl Probe {
    pub fn with_down(services: &[&str]) -> Self {
        let probe = Self::default();
        *probe.down.lock().unwrap() = services.iter().map(|s| s.to_string()).collect();
        probe
    }
}

impl HealthProbe for Probe {
    fn liveness<'a>(&'a self, _environment: &'a str, service: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            !self.down.lock().unwrap().contains(service)
        })
    }

    fn readiness<'a>(
        &'a self,
        _environment: &'a str,
        _service: &'a str,
    ) -> BoxFuture<'a, Option<bool>> {
        Box::pin(async move {
            if self.not_ready.load(Ordering::SeqCst) {
                Some(false)
            } else {
                None
            }
        })
    }
}

/// Registry that refuses selected writes.
pub struct FaultyRegistry {
    pub inner: RedbRegistry,
    /// Refuse every `update_release`.
    pub fail_updates: bool,
    /// Refuse `add_deployment` for records covering this service.
    pub fail_deployment_of: Option<String>,
}

impl FaultyRegistry {
    pub fn failing_updates() -> Self {
        Self {
            inner: RedbRegistry::open_in_memory().unwrap(),
            fail_updates: true,
            fail_deployment_of: None,
        }
    }

    pub fn failing_deployment_of(service: &str) -> Self {
        Self {
            inner: RedbRegistry::open_in_memory().unwrap(),
            fail_updates: false,
            fail_deployment_of: Some(service.to_string()),
        }
    }
}

impl Registry for FaultyRegistry {
    fn add_deployment(&self, record: &DeploymentRecord) -> RegistryResult<DeploymentRecord> {
        match &self.fail_deployment_of {
            Some(service) if record.covers(service) => {
                Err(RegistryError::Write("disk full".to_string()))
            }
            _ => self.inner.add_deployment(record),
        }
    }

    fn mark_deployment_rolled_back(&self, id: &str) -> RegistryResult<DeploymentRecord> {
        self.inner.mark_deployment_rolled_back(id)
    }

    fn get_deployment(&self, id: &str) -> RegistryResult<Option<DeploymentRecord>> {
        self.inner.get_deployment(id)
    }

    fn list_deployments(&self) -> RegistryResult<Vec<DeploymentRecord>> {
        self.inner.list_deployments()
    }

    fn add_release(&self, record: &ReleaseRecord) -> RegistryResult<ReleaseRecord> {
        self.inner.add_release(record)
    }

    fn update_release(&self, id: &str, update: &ReleaseUpdate) -> RegistryResult<ReleaseRecord> {
        if self.fail_updates {
            return Err(RegistryError::Write("disk full".to_string()));
        }
        self.inner.update_release(id, update)
    }

    fn get_release(&self, id: &str) -> RegistryResult<Option<ReleaseRecord>> {
        self.inner.get_release(id)
    }

    fn list_releases(&self) -> RegistryResult<Vec<ReleaseRecord>> {
        self.inner.list_releases()
    }

    fn add_rollback(&self, entry: &RollbackEntry) -> RegistryResult<RollbackEntry> {
        self.inner.add_rollback(entry)
    }

    fn get_rollback(&self, id: &str) -> RegistryResult<Option<RollbackEntry>> {
        self.inner.get_rollback(id)
    }

    fn list_rollbacks(&self) -> RegistryResult<Vec<RollbackEntry>> {
        self.inner.list_rollbacks()
    }

    fn put_snapshot(&self, snapshot: &RollbackSnapshot) -> RegistryResult<()> {
        self.inner.put_snapshot(snapshot)
    }

    fn get_snapshot(&self, rollback_id: &str) -> RegistryResult<Option<RollbackSnapshot>> {
        self.inner.get_snapshot(rollback_id)
    }
}

pub struct Harness {
    pub registry: Arc<RedbRegistry>,
    pub recorder: Arc<Recorder>,
    pub probe: Arc<Probe>,
}

impl Harness {
    pub fn new(recorder: Recorder) -> Self {
        Self::with_probe(recorder, Probe::default())
    }

    pub fn with_probe(recorder: Recorder, probe: Probe) -> Self {
        Self {
            registry: Arc::new(RedbRegistry::open_in_memory().unwrap()),
            recorder: Arc::new(recorder),
            probe: Arc::new(probe),
        }
    }

    pub fn executor(&self) -> ServiceExecutor {
        ServiceExecutor::new(self.recorder.clone(), self.recorder.clone())
    }

    pub fn validator(&self) -> HealthValidator {
        HealthValidator::new(self.probe.clone())
    }

    pub fn coordinator(&self) -> ReleaseCoordinator {
        ReleaseCoordinator::new(self.registry.clone(), self.executor(), self.validator())
    }

    pub fn rollback_manager(&self) -> RollbackManager {
        RollbackManager::new(self.registry.clone(), self.executor(), self.validator())
    }
}
