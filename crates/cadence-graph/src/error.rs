//! Graph validation errors.

use serde::Serialize;
use thiserror::Error;

/// Result type alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// A `depends_on` entry naming a service that is not part of the release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnknownDependency {
    pub service: String,
    pub dependency: String,
}

/// Errors raised before any deployment side effect happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("invalid service graph: {}", describe_validation(.unknown, .duplicates))]
    Validation {
        unknown: Vec<UnknownDependency>,
        duplicates: Vec<String>,
    },

    #[error("dependency cycle detected: {}", describe_cycles(.cycles))]
    Cycle { cycles: Vec<Vec<String>> },
}

fn describe_validation(unknown: &[UnknownDependency], duplicates: &[String]) -> String {
    let mut parts = Vec::new();
    if !duplicates.is_empty() {
        parts.push(format!("duplicate services [{}]", duplicates.join(", ")));
    }
    if !unknown.is_empty() {
        let refs: Vec<String> = unknown
            .iter()
            .map(|u| format!("{} -> {}", u.service, u.dependency))
            .collect();
        parts.push(format!("unknown dependencies [{}]", refs.join(", ")));
    }
    parts.join("; ")
}

fn describe_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|cycle| {
            let mut path = cycle.clone();
            if let Some(first) = cycle.first() {
                path.push(first.clone());
            }
            path.join(" -> ")
        })
        .collect::<Vec<_>>()
        .join("; ")
}
