//! Batch shaping per deploy strategy.

use cadence_core::{DeployStrategy, ServiceName};
use cadence_graph::{BatchPlan, DependencyGraph};

/// Turn a computed plan into the batches a release actually executes.
///
/// - `dependency-order` uses the scheduler's batches as-is.
/// - `parallel` puts every service in one batch, ignoring dependencies.
///   Callers choosing it assert that no real dependency exists.
/// - `sequential` runs each service alone, in declaration order.
pub fn shape_batches(
    strategy: DeployStrategy,
    graph: &DependencyGraph,
    plan: &BatchPlan,
) -> Vec<Vec<ServiceName>> {
    if graph.is_empty() {
        return Vec::new();
    }
    match strategy {
        DeployStrategy::DependencyOrder => plan.batches.clone(),
        DeployStrategy::Parallel => vec![graph.names().to_vec()],
        DeployStrategy::Sequential => graph.names().iter().map(|n| vec![n.clone()]).collect(),
    }
}
