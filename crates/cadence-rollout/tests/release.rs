//! Release coordinator integration tests.
//!
//! Drive whole releases against an in-memory registry and a recording
//! deployer, then check both the returned result and what was persisted.

mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use cadence_core::{DeployStrategy, HealthLevel, ServiceDeclaration};
use cadence_graph::GraphError;
use cadence_registry::*;
use cadence_rollout::{ReleaseCoordinator, ReleaseRequest, RolloutError};

use support::{FaultyRegistry, Harness, Probe, Recorder};

fn svc(name: &str, version: &str, deps: &[&str]) -> ServiceDeclaration {
    ServiceDeclaration::new(name, version).depends_on(deps.iter().copied())
}

/// A, then B and C which both depend on A.
fn fan_out() -> Vec<ServiceDeclaration> {
    vec![
        svc("a", "1.0.0", &[]),
        svc("b", "1.0.0", &["a"]),
        svc("c", "1.0.0", &["a"]),
    ]
}

#[tokio::test]
async fn successful_release_records_everything() {
    let h = Harness::new(Recorder::new());
    let result = h
        .coordinator()
        .coordinate_release(ReleaseRequest::new("prod", "spring", fan_out()))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.status, ReleaseStatus::Success);
    assert_eq!(result.batches, vec![vec!["a"], vec!["b", "c"]]);
    assert_eq!(result.deployment_order, vec!["a", "b", "c"]);
    assert_eq!(result.deployed, 3);
    assert_eq!(result.overall_health, HealthLevel::Healthy);
    assert!(result.health_report.as_ref().unwrap().is_healthy());
    assert!(result.skipped.is_empty());
    assert!(result.errors.is_empty());

    let stored = h.registry.get_release(&result.release_id).unwrap().unwrap();
    assert_eq!(stored.status, ReleaseStatus::Success);
    assert_eq!(stored.service_results.len(), 3);
    assert_eq!(stored.overall_health, Some(HealthLevel::Healthy));
    assert_eq!(stored.revision, 1, "exactly one terminal update");

    let deployments = h.registry.get_deployments_by_environment("prod").unwrap();
    assert_eq!(deployments.len(), 3);
    assert!(
        deployments
            .iter()
            .all(|d| d.release_id.as_deref() == Some(result.release_id.as_str()))
    );
}

#[tokio::test]
async fn batch_two_waits_for_batch_one() {
    let h = Harness::new(Recorder::new().with_delay(Duration::from_millis(20)));
    h.coordinator()
        .coordinate_release(ReleaseRequest::new("prod", "r", fan_out()))
        .await
        .unwrap();

    let done_a = h.recorder.position("deployed:a").unwrap();
    assert!(h.recorder.position("deploy:b").unwrap() > done_a);
    assert!(h.recorder.position("deploy:c").unwrap() > done_a);
}

#[tokio::test]
async fn failure_in_batch_two_rolls_back_batch_one() {
    let h = Harness::new(Recorder::new().failing_deploy(&["b"]));
    let services = vec![svc("a", "1.0.0", &[]), svc("b", "1.0.0", &["a"])];
    let result = h
        .coordinator()
        .coordinate_release(ReleaseRequest::new("prod", "r", services))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.status, ReleaseStatus::RolledBack);

    let a = result.service_results.iter().find(|r| r.service == "a").unwrap();
    let b = result.service_results.iter().find(|r| r.service == "b").unwrap();
    assert_eq!(a.status, ServiceStatus::RolledBack);
    assert_eq!(b.status, ServiceStatus::Failed);

    // The unwind starts only once the failure has been observed.
    let failed_b = h.recorder.position("failed:b").unwrap();
    let restore_a = h.recorder.position("restore:a@none").unwrap();
    assert!(restore_a > failed_b);

    // Snapshot capture precedes the restore.
    assert!(h.recorder.position("capture:a").unwrap() < restore_a);

    let a_dep = h.registry.get_deployment(a.deployment_id.as_ref().unwrap()).unwrap().unwrap();
    assert_eq!(a_dep.status, DeploymentStatus::RolledBack);
    let b_dep = h.registry.get_deployment(b.deployment_id.as_ref().unwrap()).unwrap().unwrap();
    assert_eq!(b_dep.status, DeploymentStatus::Failed);

    assert_eq!(result.rollbacks.len(), 1);
    assert_eq!(h.registry.list_rollbacks().unwrap().len(), 1);
    assert_eq!(result.overall_health, HealthLevel::Unhealthy);
}

#[tokio::test]
async fn compensation_runs_in_reverse_deployment_order() {
    let h = Harness::new(Recorder::new().failing_deploy(&["d"]));
    let services = vec![
        svc("a", "1.0.0", &[]),
        svc("b", "1.0.0", &["a"]),
        svc("c", "1.0.0", &["b"]),
        svc("d", "1.0.0", &["c"]),
    ];
    h.coordinator()
        .coordinate_release(ReleaseRequest::new("prod", "r", services))
        .await
        .unwrap();

    assert_eq!(
        h.recorder.events_with("restore:"),
        vec!["restore:c@none", "restore:b@none", "restore:a@none"]
    );
}

#[tokio::test]
async fn compensation_restores_previous_release_version() {
    let h = Harness::new(Recorder::new());
    h.coordinator()
        .coordinate_release(ReleaseRequest::new("prod", "v1", vec![svc("api", "1.0.0", &[])]))
        .await
        .unwrap();

    let h2 = Harness {
        registry: h.registry.clone(),
        recorder: Arc::new(Recorder::new().failing_deploy(&["worker"])),
        probe: h.probe.clone(),
    };
    let services = vec![svc("api", "1.1.0", &[]), svc("worker", "1.0.0", &["api"])];
    let result = h2
        .coordinator()
        .coordinate_release(ReleaseRequest::new("prod", "v2", services))
        .await
        .unwrap();

    assert_eq!(result.status, ReleaseStatus::RolledBack);
    assert_eq!(h2.recorder.events_with("restore:"), vec!["restore:api@1.0.0"]);

    // The v1 deployment is untouched; the v2 one is marked rolled back.
    let api_history: Vec<_> = h
        .registry
        .get_deployments_by_environment("prod")
        .unwrap()
        .into_iter()
        .filter(|d| d.covers("api"))
        .collect();
    assert_eq!(api_history[0].status, DeploymentStatus::Success);
    assert_eq!(api_history[1].status, DeploymentStatus::RolledBack);
}

#[tokio::test]
async fn failed_compensation_leaves_service_failed() {
    let h = Harness::new(
        Recorder::new()
            .failing_deploy(&["b"])
            .failing_restore(&["a"]),
    );
    let services = vec![svc("a", "1.0.0", &[]), svc("b", "1.0.0", &["a"])];
    let result = h
        .coordinator()
        .coordinate_release(ReleaseRequest::new("prod", "r", services))
        .await
        .unwrap();

    assert_eq!(result.status, ReleaseStatus::Failed);
    let a = result.service_results.iter().find(|r| r.service == "a").unwrap();
    assert_eq!(a.status, ServiceStatus::Failed);
    assert!(a.error.as_ref().unwrap().contains("rollback failed"));
    assert_eq!(result.deployed, 0);
    assert_eq!(result.failed, 2);
    assert_eq!(result.rolled_back, 0);
    assert_eq!(result.overall_health, HealthLevel::Unhealthy);

    let a_dep = h.registry.get_deployment(a.deployment_id.as_ref().unwrap()).unwrap().unwrap();
    assert_eq!(a_dep.status, DeploymentStatus::Success);
    assert!(!h.registry.list_rollbacks().unwrap()[0].success);
}

#[tokio::test]
async fn unhealthy_restore_is_not_a_rollback() {
    // The restore call succeeds but the service never comes back.
    let h = Harness::with_probe(Recorder::new().failing_deploy(&["b"]), Probe::default());
    let coordinator = h.coordinator();
    let services = vec![svc("a", "1.0.0", &[]), svc("b", "1.0.0", &["a"])];

    // Seed a previous version of a so the restore has a target to verify.
    h.registry
        .add_deployment(&DeploymentRecord {
            id: "seed-a".to_string(),
            external_id: None,
            environment: "prod".to_string(),
            strategy: DeployStrategy::Sequential,
            version: "0.9.0".to_string(),
            timestamp: 0,
            status: DeploymentStatus::Success,
            services_deployed: vec!["a".to_string()],
            duration_ms: 0,
            health_status: None,
            rollback_available: true,
            release_id: None,
            config: Default::default(),
            sequence: 0,
            revision: 0,
        })
        .unwrap();
    h.probe.down.lock().unwrap().insert("a".to_string());

    let result = coordinator
        .coordinate_release(ReleaseRequest::new("prod", "r", services))
        .await
        .unwrap();

    let a = result.service_results.iter().find(|r| r.service == "a").unwrap();
    assert_eq!(a.status, ServiceStatus::Failed);
    assert_eq!(result.status, ReleaseStatus::Failed);
    assert_eq!(result.overall_health, HealthLevel::Unhealthy);
    assert!(result.rollbacks[0].errors[0].contains("health check"));
}

#[tokio::test]
async fn no_rollback_when_disabled() {
    let h = Harness::new(Recorder::new().failing_deploy(&["b"]));
    let services = vec![svc("a", "1.0.0", &[]), svc("b", "1.0.0", &["a"])];
    let result = h
        .coordinator()
        .coordinate_release(
            ReleaseRequest::new("prod", "r", services).with_rollback_on_failure(false),
        )
        .await
        .unwrap();

    assert_eq!(result.status, ReleaseStatus::Failed);
    assert!(h.recorder.events_with("restore:").is_empty());
    assert_eq!(result.overall_health, HealthLevel::Degraded);
    assert!(result.rollbacks.is_empty());
}

#[tokio::test]
async fn later_batches_are_skipped_after_failure() {
    let h = Harness::new(Recorder::new().failing_deploy(&["a"]));
    let result = h
        .coordinator()
        .coordinate_release(ReleaseRequest::new("prod", "r", fan_out()))
        .await
        .unwrap();

    assert_eq!(result.skipped, vec!["b", "c"]);
    assert_eq!(result.service_results.len(), 1);
    assert!(h.recorder.events_with("deploy:").iter().all(|e| e == "deploy:a"));
    assert_eq!(result.status, ReleaseStatus::Failed);
}

#[tokio::test]
async fn cycle_refuses_with_zero_side_effects() {
    let h = Harness::new(Recorder::new());
    let services = vec![svc("a", "1.0.0", &["b"]), svc("b", "1.0.0", &["a"])];
    let err = h
        .coordinator()
        .coordinate_release(ReleaseRequest::new("prod", "r", services))
        .await
        .unwrap_err();

    match err {
        RolloutError::Graph(GraphError::Cycle { cycles }) => assert!(!cycles.is_empty()),
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.recorder.events().is_empty());
    assert!(h.registry.list_releases().unwrap().is_empty());
    assert!(h.registry.list_deployments().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_dependency_is_rejected_before_writes() {
    let h = Harness::new(Recorder::new());
    let err = h
        .coordinator()
        .coordinate_release(ReleaseRequest::new("prod", "r", vec![svc("a", "1.0.0", &["ghost"])]))
        .await
        .unwrap_err();

    assert!(matches!(err, RolloutError::Graph(GraphError::Validation { .. })));
    assert!(h.registry.list_releases().unwrap().is_empty());
}

#[tokio::test]
async fn sequential_strategy_deploys_one_at_a_time() {
    let h = Harness::new(Recorder::new().with_delay(Duration::from_millis(10)));
    let result = h
        .coordinator()
        .coordinate_release(
            ReleaseRequest::new("prod", "r", fan_out()).with_strategy(DeployStrategy::Sequential),
        )
        .await
        .unwrap();

    assert_eq!(result.batches, vec![vec!["a"], vec!["b"], vec!["c"]]);
    assert_eq!(h.recorder.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn parallel_strategy_runs_everything_at_once() {
    let h = Harness::new(Recorder::new().with_delay(Duration::from_millis(50)));
    let result = h
        .coordinator()
        .coordinate_release(
            ReleaseRequest::new("prod", "r", fan_out()).with_strategy(DeployStrategy::Parallel),
        )
        .await
        .unwrap();

    assert_eq!(result.batches.len(), 1);
    assert_eq!(h.recorder.max_in_flight.load(Ordering::SeqCst), 3);
    // Results keep batch order even though completion order varies.
    let names: Vec<&str> = result.service_results.iter().map(|r| r.service.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn deploy_timeout_counts_as_failure() {
    let h = Harness::new(Recorder::new().with_delay(Duration::from_millis(500)));
    let mut request = ReleaseRequest::new("prod", "r", vec![svc("a", "1.0.0", &[])]);
    request.deploy_timeout = Some(Duration::from_millis(20));

    let result = h.coordinator().coordinate_release(request).await.unwrap();
    assert_eq!(result.status, ReleaseStatus::Failed);
    assert!(result.service_results[0].error.as_ref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn latest_deployment_matches_last_service() {
    let h = Harness::new(Recorder::new());
    let result = h
        .coordinator()
        .coordinate_release(ReleaseRequest::new(
            "prod",
            "r",
            vec![svc("db", "5.0.0", &[]), svc("api", "2.3.1", &["db"])],
        ))
        .await
        .unwrap();

    let latest = h.registry.get_latest_deployment("prod").unwrap().unwrap();
    assert_eq!(latest.version, "2.3.1");
    assert!(latest.covers(result.deployment_order.last().unwrap()));
}

#[tokio::test]
async fn release_id_reuse_is_rejected() {
    let h = Harness::new(Recorder::new());
    let coordinator = h.coordinator();
    let mut request = ReleaseRequest::new("prod", "r", vec![svc("a", "1.0.0", &[])]);
    request.release_id = Some("rel-1".to_string());

    coordinator.coordinate_release(request.clone()).await.unwrap();
    let err = coordinator.coordinate_release(request).await.unwrap_err();
    assert!(matches!(err, RolloutError::Registry(RegistryError::Duplicate(_))));
    assert_eq!(h.recorder.events_with("deploy:").len(), 1);
}

#[tokio::test]
async fn final_write_failure_is_not_success() {
    let h = Harness::new(Recorder::new());
    let registry = Arc::new(FaultyRegistry::failing_updates());
    let coordinator = ReleaseCoordinator::new(registry.clone(), h.executor(), h.validator());

    let err = coordinator
        .coordinate_release(ReleaseRequest::new("prod", "r", vec![svc("a", "1.0.0", &[])]))
        .await
        .unwrap_err();
    assert!(matches!(err, RolloutError::Registry(RegistryError::Write(_))));

    let releases = registry.list_releases().unwrap();
    assert_eq!(releases[0].status, ReleaseStatus::InProgress);
}

#[tokio::test]
async fn deployment_write_failure_compensates_live_services() {
    let h = Harness::new(Recorder::new());
    let registry = Arc::new(FaultyRegistry::failing_deployment_of("b"));
    let coordinator = ReleaseCoordinator::new(registry.clone(), h.executor(), h.validator());
    let services = vec![
        svc("a", "1.0.0", &[]),
        svc("b", "1.0.0", &["a"]),
        svc("c", "1.0.0", &["b"]),
    ];

    let err = coordinator
        .coordinate_release(ReleaseRequest::new("prod", "r", services))
        .await
        .unwrap_err();
    assert!(matches!(err, RolloutError::Registry(RegistryError::Write(_))));

    // c never starts; b is live but unrecorded and still gets unwound first.
    assert!(h.recorder.position("deploy:c").is_none());
    let b = h.recorder.position("restore:b@none").unwrap();
    let a = h.recorder.position("restore:a@none").unwrap();
    assert!(b < a);

    let deployments = registry.list_deployments().unwrap();
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].status, DeploymentStatus::RolledBack);
    assert_eq!(registry.list_releases().unwrap()[0].status, ReleaseStatus::Failed);
}

#[tokio::test]
async fn deployment_write_failure_without_rollback_leaves_services() {
    let h = Harness::new(Recorder::new());
    let registry = Arc::new(FaultyRegistry::failing_deployment_of("b"));
    let coordinator = ReleaseCoordinator::new(registry.clone(), h.executor(), h.validator());
    let services = vec![svc("a", "1.0.0", &[]), svc("b", "1.0.0", &["a"])];

    let request = ReleaseRequest::new("prod", "r", services).with_rollback_on_failure(false);
    assert!(coordinator.coordinate_release(request).await.is_err());
    assert!(h.recorder.events_with("restore:").is_empty());
}

#[tokio::test]
async fn deployer_ids_do_not_collide_in_registry() {
    let h = Harness::new(Recorder::new().with_receipt_id("build-42"));
    let services = vec![svc("a", "1.0.0", &[]), svc("b", "1.0.0", &["a"])];
    let result = h
        .coordinator()
        .coordinate_release(ReleaseRequest::new("prod", "r", services))
        .await
        .unwrap();
    assert!(result.success);

    let deployments = h.registry.list_deployments().unwrap();
    assert_eq!(deployments.len(), 2);
    assert_ne!(deployments[0].id, deployments[1].id);
    assert!(
        deployments
            .iter()
            .all(|d| d.external_id.as_deref() == Some("build-42"))
    );
}

#[tokio::test]
async fn unhealthy_post_release_check_adds_warning() {
    let h = Harness::with_probe(Recorder::new(), Probe::with_down(&["b"]));
    let result = h
        .coordinator()
        .coordinate_release(ReleaseRequest::new("prod", "r", fan_out()))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.health_report.as_ref().unwrap().status, HealthLevel::Degraded);
    assert!(result.warnings.iter().any(|w| w.contains("post-release health check")));
}

#[tokio::test]
async fn release_notes_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(Recorder::new());
    let mut request = ReleaseRequest::new("prod", "spring", fan_out());
    request.notify_channels = vec!["#deploys".to_string()];

    let result = h
        .coordinator()
        .with_notes_dir(Some(dir.path().to_path_buf()))
        .coordinate_release(request)
        .await
        .unwrap();

    let path = result.release_notes_path.clone().unwrap();
    assert!(path.ends_with(&format!("spring-{}.md", result.release_id)));
    let notes = std::fs::read_to_string(&path).unwrap();
    assert!(notes.contains("# Release spring"));
    assert!(notes.contains("#deploys"));
    assert!(notes.contains("| b | 1.0.0 | success |"));

    let stored = h.registry.get_release(&result.release_id).unwrap().unwrap();
    assert_eq!(stored.release_notes_path, Some(path));
}

#[tokio::test]
async fn empty_release_succeeds() {
    let h = Harness::new(Recorder::new());
    let result = h
        .coordinator()
        .coordinate_release(ReleaseRequest::new("prod", "noop", vec![]))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.overall_health, HealthLevel::Healthy);
    assert!(result.batches.is_empty());
}
