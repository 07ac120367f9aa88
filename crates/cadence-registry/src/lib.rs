//! cadence-registry: release and deployment history for Cadence.
//!
//! Backed by [redb](https://docs.rs/redb), records every service
//! deployment, every release, and every rollback (with its pre-rollback
//! snapshot) so later operations can ask for "latest", "previous" and
//! "by id".
//!
//! # Architecture
//!
//! Consumers depend on the [`Registry`] trait and receive an injected
//! `Arc<dyn Registry>`. [`RedbRegistry`] is the shipped backend: records are
//! JSON-serialized into redb tables, a meta table holds the append
//! sequence, and each mutation is a whole-record replace inside one write
//! transaction. Releases additionally carry a revision for
//! compare-and-swap updates.

pub mod error;
pub mod registry;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use registry::Registry;
pub use store::RedbRegistry;
pub use types::*;
