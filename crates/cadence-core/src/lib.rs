//! cadence-core: shared model for the Cadence release orchestrator.
//!
//! Holds the types every other crate speaks: service declarations, the
//! tagged service config, deploy strategies, and health levels. Also
//! parses `cadence.toml`.

pub mod config;
pub mod types;

pub use config::{CadenceConfig, parse_duration};
pub use types::*;

use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

/// Boxed future returned by the dyn-compatible collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Fresh random identifier for releases, deployments, and rollbacks.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
