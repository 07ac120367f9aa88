//! Post-deploy and post-rollback health validation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cadence_core::{HealthLevel, ServiceConfig};

use crate::probe::HealthProbe;

/// A service the validator should expect to find running.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthTarget {
    pub service: String,
    pub config: ServiceConfig,
}

impl HealthTarget {
    pub fn new(service: impl Into<String>, config: ServiceConfig) -> Self {
        Self {
            service: service.into(),
            config,
        }
    }
}

/// Outcome of one independent check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn new(name: &str, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed,
            detail: detail.into(),
        }
    }
}

/// Aggregate of the checks run against one set of targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthLevel,
    pub checks: Vec<CheckResult>,
    /// Targets that answered the liveness probe.
    pub live: usize,
    /// Targets the validator was asked about.
    pub expected: usize,
}

impl HealthReport {
    fn from_checks(checks: Vec<CheckResult>, live: usize, expected: usize) -> Self {
        let passed = checks.iter().filter(|c| c.passed).count();
        Self {
            status: HealthLevel::from_ratio(passed, checks.len()),
            checks,
            live,
            expected,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// Names of the checks that did not pass.
    pub fn failed_checks(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Runs the liveness, config and readiness checks through a [`HealthProbe`].
///
/// Never mutates anything; safe to call after forward deploys and after
/// rollbacks alike.
#[derive(Clone)]
pub struct HealthValidator {
    probe: Arc<dyn HealthProbe>,
    require_readiness: bool,
}

impl HealthValidator {
    pub fn new(probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            probe,
            require_readiness: false,
        }
    }

    /// When set, a target with no readiness signal fails the readiness check.
    pub fn with_required_readiness(mut self, required: bool) -> Self {
        self.require_readiness = required;
        self
    }

    pub async fn validate(&self, environment: &str, targets: &[HealthTarget]) -> HealthReport {
        let mut checks = Vec::with_capacity(3);

        // Liveness: every expected service answers.
        let mut down = Vec::new();
        for target in targets {
            if !self.probe.liveness(environment, &target.service).await {
                down.push(target.service.clone());
            }
        }
        let live = targets.len() - down.len();
        let detail = if down.is_empty() {
            format!("{live}/{} services live", targets.len())
        } else {
            format!(
                "{live}/{} services live; down: {}",
                targets.len(),
                down.join(", ")
            )
        };
        checks.push(CheckResult::new("liveness", down.is_empty(), detail));

        // Config: every target's configuration is syntactically valid.
        let invalid: Vec<String> = targets
            .iter()
            .filter_map(|t| {
                t.config
                    .validate()
                    .err()
                    .map(|e| format!("{}: {e}", t.service))
            })
            .collect();
        let detail = if invalid.is_empty() {
            "all configurations valid".to_string()
        } else {
            invalid.join("; ")
        };
        checks.push(CheckResult::new("config", invalid.is_empty(), detail));

        // Readiness: only when required or some service exposes a signal.
        let mut signals = Vec::with_capacity(targets.len());
        for target in targets {
            let signal = self.probe.readiness(environment, &target.service).await;
            signals.push((target.service.as_str(), signal));
        }
        let any_signal = signals.iter().any(|(_, s)| s.is_some());
        if self.require_readiness || any_signal {
            let mut problems = Vec::new();
            for (service, signal) in &signals {
                match signal {
                    Some(true) => {}
                    Some(false) => problems.push(format!("{service} not ready")),
                    None if self.require_readiness => {
                        problems.push(format!("{service} has no readiness signal"))
                    }
                    None => {}
                }
            }
            let detail = if problems.is_empty() {
                "all signals ready".to_string()
            } else {
                problems.join("; ")
            };
            checks.push(CheckResult::new("readiness", problems.is_empty(), detail));
        } else {
            debug!(%environment, "no readiness signals, skipping readiness check");
        }

        let report = HealthReport::from_checks(checks, live, targets.len());
        if report.is_healthy() {
            info!(
                %environment,
                live = report.live,
                expected = report.expected,
                "health validation passed"
            );
        } else {
            warn!(
                %environment,
                status = %report.status,
                failed = ?report.failed_checks(),
                "health validation failed"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap, HashSet};

    use cadence_core::{BoxFuture, ConfigFormat};

    #[derive(Default)]
    struct FakeProbe {
        down: HashSet<String>,
        ready: HashMap<String, bool>,
    }

    impl HealthProbe for FakeProbe {
        fn liveness<'a>(&'a self, _env: &'a str, service: &'a str) -> BoxFuture<'a, bool> {
            Box::pin(async move { !self.down.contains(service) })
        }

        fn readiness<'a>(&'a self, _env: &'a str, service: &'a str) -> BoxFuture<'a, Option<bool>> {
            Box::pin(async move { self.ready.get(service).copied() })
        }
    }

    fn targets(names: &[&str]) -> Vec<HealthTarget> {
        names
            .iter()
            .map(|n| HealthTarget::new(*n, ServiceConfig::Empty))
            .collect()
    }

    #[tokio::test]
    async fn all_live_without_signals_is_healthy() {
        let validator = HealthValidator::new(Arc::new(FakeProbe::default()));
        let report = validator.validate("prod", &targets(&["a", "b"])).await;
        assert_eq!(report.status, HealthLevel::Healthy);
        assert_eq!(report.checks.len(), 2, "readiness skipped without signals");
        assert_eq!((report.live, report.expected), (2, 2));
    }

    #[tokio::test]
    async fn one_down_degrades() {
        let probe = FakeProbe {
            down: HashSet::from(["b".to_string()]),
            ..Default::default()
        };
        let validator = HealthValidator::new(Arc::new(probe));
        let report = validator.validate("prod", &targets(&["a", "b"])).await;
        assert_eq!(report.status, HealthLevel::Degraded);
        assert_eq!(report.live, 1);
        assert_eq!(report.failed_checks(), vec!["liveness"]);
    }

    #[tokio::test]
    async fn invalid_config_fails_config_check() {
        let validator = HealthValidator::new(Arc::new(FakeProbe::default()));
        let bad = HealthTarget::new(
            "a",
            ServiceConfig::Document {
                format: ConfigFormat::Json,
                content: "{not json".to_string(),
            },
        );
        let report = validator.validate("prod", &[bad]).await;
        assert_eq!(report.failed_checks(), vec!["config"]);
        assert!(!report.is_healthy());
    }

    #[tokio::test]
    async fn not_ready_signal_fails_readiness() {
        let probe = FakeProbe {
            ready: HashMap::from([("a".to_string(), true), ("b".to_string(), false)]),
            ..Default::default()
        };
        let validator = HealthValidator::new(Arc::new(probe));
        let report = validator.validate("prod", &targets(&["a", "b"])).await;
        assert_eq!(report.checks.len(), 3);
        assert_eq!(report.failed_checks(), vec!["readiness"]);
        assert_eq!(report.status, HealthLevel::Degraded);
    }

    #[tokio::test]
    async fn required_readiness_fails_on_missing_signal() {
        let validator =
            HealthValidator::new(Arc::new(FakeProbe::default())).with_required_readiness(true);
        let report = validator.validate("prod", &targets(&["a"])).await;
        let readiness = report.checks.iter().find(|c| c.name == "readiness").unwrap();
        assert!(!readiness.passed);
        assert!(readiness.detail.contains("no readiness signal"));
    }

    #[tokio::test]
    async fn everything_failing_is_unhealthy() {
        let probe = FakeProbe {
            down: HashSet::from(["a".to_string()]),
            ready: HashMap::from([("a".to_string(), false)]),
        };
        let bad = HealthTarget::new(
            "a",
            ServiceConfig::Env {
                vars: BTreeMap::from([(String::new(), "x".to_string())]),
            },
        );
        let validator = HealthValidator::new(Arc::new(probe));
        let report = validator.validate("prod", &[bad]).await;
        assert_eq!(report.status, HealthLevel::Unhealthy);
    }

    #[tokio::test]
    async fn empty_target_set_is_healthy() {
        let validator = HealthValidator::new(Arc::new(FakeProbe::default()));
        let report = validator.validate("prod", &[]).await;
        assert!(report.is_healthy());
        assert_eq!(report.expected, 0);
    }

    #[test]
    fn report_serializes_status_lowercase() {
        let report = HealthReport::from_checks(vec![], 0, 0);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "healthy");
    }
}
