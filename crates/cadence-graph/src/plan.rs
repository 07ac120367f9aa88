//! Batch scheduler: Kahn layering with cycle recovery.
//!
//! Each round collects every service whose dependencies have all been
//! retired, in declaration order, and emits them as one batch. When a round
//! finds nothing ready while services remain, the leftovers contain at least
//! one cycle; those are recovered for diagnostics with a strongly connected
//! component pass followed by a depth-first walk inside each component.

use std::collections::{HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use tracing::{debug, warn};

use cadence_core::ServiceName;

use crate::error::{GraphError, GraphResult};
use crate::graph::DependencyGraph;

/// Output of the batch scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchPlan {
    /// Concatenation of `batches`.
    pub order: Vec<ServiceName>,
    /// Batches in execution order; members of a batch share no edges.
    pub batches: Vec<Vec<ServiceName>>,
    /// Each cycle lists services along "depends on" edges; the last entry
    /// depends on the first.
    pub cycles: Vec<Vec<ServiceName>>,
}

impl BatchPlan {
    /// Compute batches for a validated graph.
    ///
    /// When cycles exist, `batches` holds only the acyclic prefix that could
    /// be scheduled and `cycles` is non-empty.
    pub fn compute(graph: &DependencyGraph) -> Self {
        let mut in_degree: HashMap<&str, usize> = graph
            .names()
            .iter()
            .map(|name| (name.as_str(), graph.dependencies_of(name).count()))
            .collect();
        let mut remaining: Vec<&str> = graph.names().iter().map(String::as_str).collect();
        let mut batches: Vec<Vec<ServiceName>> = Vec::new();
        let mut cycles = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .iter()
                .copied()
                .filter(|name| in_degree.get(name).copied() == Some(0))
                .collect();

            if ready.is_empty() {
                cycles = find_cycles(graph, &remaining);
                warn!(
                    unscheduled = remaining.len(),
                    cycles = cycles.len(),
                    "dependency cycle prevents scheduling"
                );
                break;
            }

            for name in &ready {
                for consumer in graph.dependents_of(name) {
                    if let Some(degree) = in_degree.get_mut(consumer.as_str()) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }

            let retired: HashSet<&str> = ready.iter().copied().collect();
            remaining.retain(|name| !retired.contains(name));

            debug!(batch = batches.len(), size = ready.len(), "batch formed");
            batches.push(ready.into_iter().map(str::to_string).collect());
        }

        let order = batches.iter().flatten().cloned().collect();
        Self {
            order,
            batches,
            cycles,
        }
    }

    /// Compute batches, failing with [`GraphError::Cycle`] if any cycle exists.
    pub fn compute_acyclic(graph: &DependencyGraph) -> GraphResult<Self> {
        let plan = Self::compute(graph);
        if plan.has_cycles() {
            return Err(GraphError::Cycle {
                cycles: plan.cycles,
            });
        }
        Ok(plan)
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }

    /// Whether `order` places every dependency before its dependents.
    pub fn is_topological(&self, graph: &DependencyGraph) -> bool {
        let position: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        self.order.iter().all(|name| {
            graph.dependencies_of(name).all(|dep| {
                matches!(
                    (position.get(dep.as_str()), position.get(name.as_str())),
                    (Some(d), Some(n)) if d < n
                )
            })
        })
    }
}

/// Recover cycles among services that could not be scheduled.
fn find_cycles<'g>(graph: &'g DependencyGraph, remaining: &[&'g str]) -> Vec<Vec<ServiceName>> {
    let mut digraph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for &name in remaining {
        index.insert(name, digraph.add_node(name));
    }
    for &name in remaining {
        for dep in graph.dependencies_of(name) {
            if let (Some(&from), Some(&to)) = (index.get(name), index.get(dep.as_str())) {
                digraph.add_edge(from, to, ());
            }
        }
    }

    let mut components: Vec<Vec<&str>> = tarjan_scc(&digraph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || digraph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut members: Vec<&str> = scc.into_iter().map(|ix| digraph[ix]).collect();
            members.sort_by_key(|name| graph.position(name).unwrap_or(usize::MAX));
            members
        })
        .collect();
    components.sort_by_key(|members| graph.position(members[0]).unwrap_or(usize::MAX));

    components
        .into_iter()
        .map(|members| {
            let scope: HashSet<&str> = members.iter().copied().collect();
            let start = members[0];
            let mut path = vec![start.to_string()];
            let mut visited = HashSet::from([start]);
            if !walk_back_to(graph, &scope, start, start, &mut path, &mut visited) {
                // Unreachable for a strongly connected component; keep the
                // members so the diagnostic is never empty.
                return members.iter().map(|m| m.to_string()).collect();
            }
            path
        })
        .collect()
}

/// Depth-first search along dependency edges for a path returning to `start`.
fn walk_back_to<'g>(
    graph: &'g DependencyGraph,
    scope: &HashSet<&str>,
    start: &str,
    current: &str,
    path: &mut Vec<ServiceName>,
    visited: &mut HashSet<&'g str>,
) -> bool {
    for dep in graph.dependencies_of(current) {
        let dep = dep.as_str();
        if !scope.contains(dep) {
            continue;
        }
        if dep == start {
            return true;
        }
        if visited.insert(dep) {
            path.push(dep.to_string());
            if walk_back_to(graph, scope, start, dep, path, visited) {
                return true;
            }
            path.pop();
        }
    }
    false
}
