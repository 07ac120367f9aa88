//! cadence.toml configuration parser.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{DeployStrategy, ServiceConfig, ServiceDeclaration};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub release: ReleaseSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub health: HealthSettings,
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSettings {
    pub name: Option<String>,
    #[serde(default)]
    pub strategy: DeployStrategy,
    #[serde(default = "default_true")]
    pub rollback_on_failure: bool,
    #[serde(default)]
    pub notify: Vec<String>,
    pub notes_dir: Option<PathBuf>,
    /// Per-service deploy deadline, e.g. "300s".
    pub deploy_timeout: Option<String>,
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            name: None,
            strategy: DeployStrategy::default(),
            rollback_on_failure: true,
            notify: Vec::new(),
            notes_dir: None,
            deploy_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    pub path: PathBuf,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".cadence/registry.redb"),
        }
    }
}

/// Commands backing the script executor. Each is an argv list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default)]
    pub deploy: Vec<String>,
    #[serde(default)]
    pub restore: Vec<String>,
    pub capture: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default)]
    pub require_readiness: bool,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: String,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            require_readiness: false,
            probe_timeout: default_probe_timeout(),
        }
    }
}

/// A `[[service]]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Readiness endpoint as `host:port/path`.
    pub health_url: Option<String>,
    #[serde(default)]
    pub config: ServiceConfig,
}

impl ServiceEntry {
    pub fn declaration(&self) -> ServiceDeclaration {
        ServiceDeclaration {
            name: self.name.clone(),
            depends_on: self.depends_on.clone(),
            version: self.version.clone(),
            config: self.config.clone(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_probe_timeout() -> String {
    "2s".to_string()
}

impl CadenceConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: CadenceConfig = toml::from_str(content)?;
        if let Some(raw) = &config.release.deploy_timeout {
            if parse_duration(raw).is_none() {
                anyhow::bail!("invalid release.deploy_timeout {raw:?}");
            }
        }
        if parse_duration(&config.health.probe_timeout).is_none() {
            anyhow::bail!("invalid health.probe_timeout {:?}", config.health.probe_timeout);
        }
        Ok(config)
    }

    /// Service declarations in file order.
    pub fn declarations(&self) -> Vec<ServiceDeclaration> {
        self.services.iter().map(ServiceEntry::declaration).collect()
    }

    pub fn deploy_timeout(&self) -> Option<Duration> {
        self.release.deploy_timeout.as_deref().and_then(parse_duration)
    }

    pub fn probe_timeout(&self) -> Duration {
        parse_duration(&self.health.probe_timeout).unwrap_or(Duration::from_secs(2))
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
