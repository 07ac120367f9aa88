//! Shared types used across Cadence crates.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Name of a service; unique within a release.
pub type ServiceName = String;

/// A service to be rolled out as part of a release.
///
/// Declarations are immutable inputs: the coordinator never rewrites them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDeclaration {
    pub name: ServiceName,
    /// Names of services that must be deployed before this one.
    #[serde(default)]
    pub depends_on: BTreeSet<ServiceName>,
    pub version: String,
    #[serde(default)]
    pub config: ServiceConfig,
}

impl ServiceDeclaration {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            depends_on: BTreeSet::new(),
            version: version.to_string(),
            config: ServiceConfig::Empty,
        }
    }

    /// Builder-style helper to add dependencies.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }
}

// ── Service config ─────────────────────────────────────────────────

/// Configuration handed to the external deploy operation.
///
/// A tagged union rather than an untyped map so that the structure is
/// checked at the boundary.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceConfig {
    /// No configuration.
    #[default]
    Empty,
    /// Flat environment variables.
    Env { vars: BTreeMap<String, String> },
    /// A configuration document in a known format.
    Document {
        format: ConfigFormat,
        content: String,
    },
}

/// Format of a [`ServiceConfig::Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ServiceConfig {
    /// Check that the configuration is syntactically valid.
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ServiceConfig::Empty => Ok(()),
            ServiceConfig::Env { vars } => {
                for key in vars.keys() {
                    if key.is_empty() {
                        return Err("empty environment variable name".to_string());
                    }
                    if key.contains('=') || key.chars().any(char::is_whitespace) {
                        return Err(format!("invalid environment variable name {key:?}"));
                    }
                }
                Ok(())
            }
            ServiceConfig::Document { format, content } => match format {
                ConfigFormat::Json => serde_json::from_str::<serde_json::Value>(content)
                    .map(|_| ())
                    .map_err(|e| format!("invalid JSON config: {e}")),
                ConfigFormat::Toml => toml::from_str::<toml::Value>(content)
                    .map(|_| ())
                    .map_err(|e| format!("invalid TOML config: {e}")),
            },
        }
    }
}

// ── Strategy ───────────────────────────────────────────────────────

/// How the batches of a release are formed and executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployStrategy {
    /// Every service is its own batch, in declaration order.
    Sequential,
    /// All services in a single batch. Declared dependencies are ignored.
    Parallel,
    /// Topologically computed batches.
    #[default]
    DependencyOrder,
}

impl DeployStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStrategy::Sequential => "sequential",
            DeployStrategy::Parallel => "parallel",
            DeployStrategy::DependencyOrder => "dependency-order",
        }
    }

    /// Whether members of a batch run concurrently.
    pub fn is_concurrent(&self) -> bool {
        !matches!(self, DeployStrategy::Sequential)
    }
}

impl fmt::Display for DeployStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeployStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(DeployStrategy::Sequential),
            "parallel" => Ok(DeployStrategy::Parallel),
            "dependency-order" | "dependency_order" => Ok(DeployStrategy::DependencyOrder),
            other => Err(format!(
                "unknown strategy {other:?} (expected sequential, parallel or dependency-order)"
            )),
        }
    }
}

// ── Health ─────────────────────────────────────────────────────────

/// Aggregate health of a release or a set of checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthLevel {
    /// `Healthy` at 100%, `Degraded` at 50% or more, `Unhealthy` below.
    ///
    /// An empty set counts as healthy.
    pub fn from_ratio(passed: usize, total: usize) -> Self {
        if total == 0 || passed >= total {
            HealthLevel::Healthy
        } else if passed * 2 >= total {
            HealthLevel::Degraded
        } else {
            HealthLevel::Unhealthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthLevel::Healthy)
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthLevel::Healthy => "healthy",
            HealthLevel::Degraded => "degraded",
            HealthLevel::Unhealthy => "unhealthy",
        })
    }
}

// ── Versions ───────────────────────────────────────────────────────

/// Major component of a version string, tolerating a leading `v` and
/// non-semver tails (`2.1`, `v3`, `4.0.0-rc.1`).
pub fn major_version(version: &str) -> Option<u64> {
    let trimmed = version.trim().trim_start_matches(['v', 'V']);
    if let Ok(parsed) = semver::Version::parse(trimmed) {
        return Some(parsed.major);
    }
    trimmed
        .split(['.', '-', '+'])
        .next()
        .and_then(|major| major.parse::<u64>().ok())
}
