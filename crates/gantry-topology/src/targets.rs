//! The blue/green target pair.
//!
//! Two independently addressable pools of identical shape behind the
//! same load balancer. The pair exists so a new revision's tasks can
//! register and pass health checks before receiving production
//! traffic: "healthy" is decoupled from "live".

use serde::{Deserialize, Serialize};

use gantry_core::TargetColor;

/// Health-check parameters shared by both target sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    /// HTTP path probed on each task, e.g. "/healthz".
    pub path: String,
    /// Port probed (same as the traffic port).
    pub port: u16,
    /// Probe interval, e.g. "5s".
    pub interval: Option<String>,
    /// Per-probe timeout, e.g. "2s".
    pub timeout: Option<String>,
    /// Consecutive failures before a task counts as unhealthy.
    pub unhealthy_threshold: u32,
}

impl HealthCheckSpec {
    pub fn new(path: &str, port: u16) -> Self {
        Self {
            path: path.to_string(),
            port,
            interval: Some("5s".to_string()),
            timeout: Some("2s".to_string()),
            unhealthy_threshold: 3,
        }
    }
}

/// One named, IP-addressed pool of task endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSet {
    pub color: TargetColor,
    /// Traffic port, identical across the pair.
    pub port: u16,
    pub health: HealthCheckSpec,
}

/// Both pools, constructed from a single shape so they can never
/// diverge in port or health-check protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPair {
    pub blue: TargetSet,
    pub green: TargetSet,
}

impl TargetPair {
    pub fn new(port: u16, health: HealthCheckSpec) -> Self {
        Self {
            blue: TargetSet {
                color: TargetColor::Blue,
                port,
                health: health.clone(),
            },
            green: TargetSet {
                color: TargetColor::Green,
                port,
                health,
            },
        }
    }

    pub fn get(&self, color: TargetColor) -> &TargetSet {
        match color {
            TargetColor::Blue => &self.blue,
            TargetColor::Green => &self.green,
        }
    }
}
