pub mod history;
pub mod plan;
pub mod release;
pub mod rollback;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use serde::Serialize;

use cadence_core::CadenceConfig;
use cadence_executor::{ScriptDeployer, ServiceExecutor};
use cadence_health::{Endpoint, HealthValidator, HttpReadinessProbe};
use cadence_registry::RedbRegistry;
use cadence_rollout::{ReleaseCoordinator, RollbackManager};

/// Everything a command needs, assembled from `cadence.toml`.
pub struct Context {
    pub config: CadenceConfig,
    pub registry: Arc<RedbRegistry>,
}

impl Context {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = CadenceConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?;
        let registry_path = match path.parent() {
            Some(dir) if config.registry.path.is_relative() => dir.join(&config.registry.path),
            _ => config.registry.path.clone(),
        };
        let registry = RedbRegistry::open(&registry_path)
            .with_context(|| format!("opening registry {}", registry_path.display()))?;
        Ok(Self {
            config,
            registry: Arc::new(registry),
        })
    }

    pub fn executor(&self) -> ServiceExecutor {
        let script = Arc::new(ScriptDeployer::from_settings(&self.config.executor));
        ServiceExecutor::new(script.clone(), script).with_deadline(self.config.deploy_timeout())
    }

    pub fn validator(&self) -> anyhow::Result<HealthValidator> {
        let mut probe = HttpReadinessProbe::new(self.config.probe_timeout());
        for service in &self.config.services {
            if let Some(url) = &service.health_url {
                let endpoint = Endpoint::parse(url).with_context(|| {
                    format!("invalid health_url {url:?} for service {}", service.name)
                })?;
                probe = probe.with_endpoint(&service.name, endpoint);
            }
        }
        Ok(HealthValidator::new(Arc::new(probe))
            .with_required_readiness(self.config.health.require_readiness))
    }

    pub fn coordinator(&self) -> anyhow::Result<ReleaseCoordinator> {
        Ok(
            ReleaseCoordinator::new(self.registry.clone(), self.executor(), self.validator()?)
                .with_notes_dir(self.config.release.notes_dir.clone()),
        )
    }

    pub fn rollback_manager(&self) -> anyhow::Result<RollbackManager> {
        Ok(RollbackManager::new(
            self.registry.clone(),
            self.executor(),
            self.validator()?,
        ))
    }
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
