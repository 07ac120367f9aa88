//! cadence-executor: the single-service deploy and restore operations.
//!
//! The core never talks to a deploy system directly. It goes through the
//! [`ServiceDeployer`] and [`ServiceRestorer`] traits, wrapped by a
//! [`ServiceExecutor`] that enforces deadlines and turns every failure into
//! a plain outcome value.

pub mod error;
pub mod executor;
pub mod request;
pub mod script;

pub use error::{ExecutorError, ExecutorResult};
pub use executor::{ServiceDeployer, ServiceExecutor, ServiceRestorer};
pub use request::*;
pub use script::ScriptDeployer;
