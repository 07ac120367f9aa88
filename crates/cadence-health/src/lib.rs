//! cadence-health: health validation for Cadence releases and rollbacks.
//!
//! The [`HealthValidator`] runs three independent checks against a set of
//! targets (liveness, config validity, readiness) and folds them into a
//! [`HealthLevel`](cadence_core::HealthLevel). Observation goes through the
//! [`HealthProbe`] trait; [`HttpReadinessProbe`] is the network-backed one.

pub mod probe;
pub mod validator;

pub use probe::{
    Endpoint, HealthProbe, HttpReadinessProbe, ProbeResult, ReadinessState, ReadinessTracker,
    readiness_from_status,
};
pub use validator::{CheckResult, HealthReport, HealthTarget, HealthValidator};
