use std::path::Path;

use anyhow::Context as _;
use serde::Serialize;

use cadence_core::{CadenceConfig, DeployStrategy, ServiceName};
use cadence_graph::{BatchPlan, DependencyGraph};
use cadence_rollout::shape_batches;

#[derive(Serialize)]
struct PlanOutput {
    strategy: DeployStrategy,
    batches: Vec<Vec<ServiceName>>,
    deployment_order: Vec<ServiceName>,
    cycles: Vec<Vec<ServiceName>>,
}

/// Print the batches a release would run. Returns false when the graph
/// has cycles.
pub fn run(config_path: &Path, strategy: Option<DeployStrategy>) -> anyhow::Result<bool> {
    let config = CadenceConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let strategy = strategy.unwrap_or(config.release.strategy);

    let graph = DependencyGraph::build(&config.declarations())?;
    let plan = BatchPlan::compute(&graph);
    let batches = if plan.has_cycles() {
        plan.batches.clone()
    } else {
        shape_batches(strategy, &graph, &plan)
    };

    let output = PlanOutput {
        strategy,
        deployment_order: batches.concat(),
        batches,
        cycles: plan.cycles,
    };
    super::print_json(&output)?;
    Ok(output.cycles.is_empty())
}
