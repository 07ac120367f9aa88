//! cadence-graph: dependency graph validation and batch scheduling.
//!
//! A release starts as a flat list of [`ServiceDeclaration`]s. This crate
//! turns it into a validated [`DependencyGraph`] and then into a
//! [`BatchPlan`]: ordered batches whose members can be deployed
//! concurrently because no edges join them.
//!
//! ```text
//! [ServiceDeclaration] ──build──▶ DependencyGraph ──compute──▶ BatchPlan
//!                          │                                    │
//!                   Validation error                     cycles (fatal)
//! ```
//!
//! [`ServiceDeclaration`]: cadence_core::ServiceDeclaration

pub mod error;
pub mod graph;
pub mod plan;

pub use error::{GraphError, GraphResult, UnknownDependency};
pub use graph::DependencyGraph;
pub use plan::BatchPlan;
