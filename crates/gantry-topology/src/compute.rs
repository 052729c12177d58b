//! Compute cluster, service, and immutable task definitions.

use serde::{Deserialize, Serialize};

use gantry_core::config::DeploymentMode;
use gantry_core::{ImageRef, TargetColor};

/// The container-orchestration cluster hosting the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
}

/// Immutable description of one revision of the application.
///
/// A rollout always registers a new revision; an existing one is never
/// mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub family: String,
    pub revision: u32,
    pub image: ImageRef,
    /// CPU units per task.
    pub cpu: u32,
    /// Memory per task in MiB.
    pub memory_mib: u32,
    pub container_port: u16,
    pub log_stream_prefix: Option<String>,
    pub task_role: Option<String>,
    pub execution_role: Option<String>,
}

impl TaskDefinition {
    /// Derive the next revision of this family with a new image.
    /// Everything else carries over; the receiver is untouched.
    pub fn next_revision(&self, image: ImageRef) -> TaskDefinition {
        TaskDefinition {
            family: self.family.clone(),
            revision: self.revision + 1,
            image,
            cpu: self.cpu,
            memory_mib: self.memory_mib,
            container_port: self.container_port,
            log_stream_prefix: self.log_stream_prefix.clone(),
            task_role: self.task_role.clone(),
            execution_role: self.execution_role.clone(),
        }
    }
}

/// The long-lived service running on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    /// Typed back-reference to the owning cluster.
    pub cluster: String,
    pub desired_count: u32,
    pub assign_public_ip: bool,
    pub enable_execute_command: bool,
    /// Blue-green mode hands cutovers to the rollout controller; the
    /// cluster must not run its own rolling update in that mode.
    pub deployment_mode: DeploymentMode,
    /// The target set attached at steady state (the live color).
    pub attached_target: TargetColor,
}

impl Service {
    /// Whether the external rollout controller owns cutovers.
    pub fn rollout_controlled(&self) -> bool {
        self.deployment_mode == DeploymentMode::BlueGreen
    }
}
