//! Persisted domain types for the gantry state store.

use serde::{Deserialize, Serialize};

use gantry_core::{RolloutId, ServiceId, ShiftSchedule, TargetColor, TaskEndpoint};

/// Coarse lifecycle of a rollout record.
///
/// `Created → InProgress → {Succeeded, RolledBack, Failed}`; terminal
/// statuses are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    Created,
    InProgress,
    Succeeded,
    RolledBack,
    Failed,
}

impl RolloutStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RolloutStatus::Succeeded | RolloutStatus::RolledBack | RolloutStatus::Failed
        )
    }
}

/// One execution of the blue-green protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutRecord {
    pub id: RolloutId,
    pub service: ServiceId,
    /// Source revision (commit id or tag) that produced the image.
    pub source_revision: String,
    /// Task definition family of the replacement revision.
    pub family: String,
    /// Replacement revision number.
    pub revision: u32,
    pub schedule: ShiftSchedule,
    pub status: RolloutStatus,
    /// Fine-grained state machine phase, for observability.
    pub phase: String,
    /// Terminal reason (health timeout, rollback trigger, fault).
    pub reason: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl RolloutRecord {
    /// Build the composite key for the rollouts table.
    pub fn table_key(&self) -> String {
        rollout_key(&self.service, &self.id)
    }
}

pub fn rollout_key(service: &str, rollout_id: &str) -> String {
    format!("{service}:{rollout_id}")
}

/// Steady-state record for a service: which color is live and which
/// task definition revision it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    pub name: ServiceId,
    pub live_target: TargetColor,
    pub task_definition_revision: u32,
    pub desired_count: u32,
    pub updated_at: u64,
}

/// Membership of one target set. Ownership moves to the rollout driver
/// during a rollout and back to the service at cutover completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSetState {
    pub service: ServiceId,
    pub color: TargetColor,
    /// Registered task endpoints (`ip:port`). A task never belongs to
    /// both colors at once.
    pub members: Vec<TaskEndpoint>,
    pub updated_at: u64,
}

impl TargetSetState {
    pub fn empty(service: &str, color: TargetColor, now: u64) -> Self {
        Self {
            service: service.to_string(),
            color,
            members: Vec::new(),
            updated_at: now,
        }
    }

    /// Build the composite key for the target_sets table.
    pub fn table_key(&self) -> String {
        target_set_key(&self.service, self.color)
    }
}

pub fn target_set_key(service: &str, color: TargetColor) -> String {
    format!("{service}:{color}")
}
