//! gantry-health — health probes and the rollout readiness gate.
//!
//! The rollout controller never shifts traffic to tasks that have not
//! proven themselves healthy. This crate provides the probe primitives
//! (HTTP probe, consecutive-result tracker) and the bounded
//! [`ReadinessGate`] wait used as the provisioning guard.

pub mod checker;
pub mod gate;

pub use checker::{HealthStatus, HealthTracker, HttpProber, ProbeResult, Prober};
pub use gate::{GateError, ReadinessGate};
