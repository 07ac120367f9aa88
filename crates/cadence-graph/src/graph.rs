//! Dependency graph construction and validation.
//!
//! Edges point from a service to the services it depends on. The reverse
//! map records consumers, which the batch scheduler walks when it retires
//! a batch.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use cadence_core::{ServiceDeclaration, ServiceName};

use crate::error::{GraphError, GraphResult, UnknownDependency};

/// Validated dependency graph for a single release.
///
/// Built fresh per release and read-only afterwards, so it can be shared
/// freely between the tasks of a batch.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Service names in declaration order.
    order: Vec<ServiceName>,
    nodes: HashMap<ServiceName, ServiceDeclaration>,
    /// Forward edges: service → its dependencies.
    edges: HashMap<ServiceName, BTreeSet<ServiceName>>,
    /// Reverse edges: service → services that depend on it.
    reverse_edges: HashMap<ServiceName, BTreeSet<ServiceName>>,
}

impl DependencyGraph {
    /// Build a graph from a flat list of declarations.
    ///
    /// Fails with [`GraphError::Validation`] listing every duplicate name and
    /// every dependency that references a service outside the list.
    pub fn build(services: &[ServiceDeclaration]) -> GraphResult<Self> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for decl in services {
            if !seen.insert(decl.name.as_str()) && !duplicates.contains(&decl.name) {
                duplicates.push(decl.name.clone());
            }
        }

        let mut unknown = Vec::new();
        for decl in services {
            for dep in &decl.depends_on {
                if !seen.contains(dep.as_str()) {
                    unknown.push(UnknownDependency {
                        service: decl.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        if !duplicates.is_empty() || !unknown.is_empty() {
            return Err(GraphError::Validation {
                unknown,
                duplicates,
            });
        }

        let mut graph = Self {
            order: Vec::with_capacity(services.len()),
            nodes: HashMap::with_capacity(services.len()),
            edges: HashMap::with_capacity(services.len()),
            reverse_edges: HashMap::with_capacity(services.len()),
        };

        for decl in services {
            graph.order.push(decl.name.clone());
            graph.nodes.insert(decl.name.clone(), decl.clone());
            graph
                .edges
                .insert(decl.name.clone(), decl.depends_on.clone());
            graph.reverse_edges.entry(decl.name.clone()).or_default();
        }
        for decl in services {
            for dep in &decl.depends_on {
                graph
                    .reverse_edges
                    .entry(dep.clone())
                    .or_default()
                    .insert(decl.name.clone());
            }
        }

        debug!(services = graph.order.len(), "dependency graph built");
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Service names in declaration order.
    pub fn names(&self) -> &[ServiceName] {
        &self.order
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDeclaration> {
        self.nodes.get(name)
    }

    /// Declarations in declaration order.
    pub fn declarations(&self) -> impl Iterator<Item = &ServiceDeclaration> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    /// Position of a service in the input list.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.order.iter().position(|n| n == name)
    }

    /// Services that `name` depends on.
    pub fn dependencies_of(&self, name: &str) -> impl Iterator<Item = &ServiceName> {
        self.edges.get(name).into_iter().flatten()
    }

    /// Services that depend on `name`.
    pub fn dependents_of(&self, name: &str) -> impl Iterator<Item = &ServiceName> {
        self.reverse_edges.get(name).into_iter().flatten()
    }

    /// Whether `from` directly depends on `to`.
    pub fn depends_on(&self, from: &str, to: &str) -> bool {
        self.edges.get(from).is_some_and(|deps| deps.contains(to))
    }
}
