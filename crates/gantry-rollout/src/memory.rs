//! In-memory cluster backend.
//!
//! The simulation substrate behind `gantryd run` and the driver tests:
//! tracks registered revisions, per-color task membership, and every
//! listener weight mutation in order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use gantry_core::{TargetColor, TaskEndpoint};
use gantry_health::{ProbeResult, Prober};
use gantry_topology::TaskDefinition;

use crate::driver::{BackendError, ClusterBackend, TrafficSplit};

#[derive(Debug, Default)]
struct MemoryClusterInner {
    revisions: Vec<(String, u32)>,
    members: HashMap<TargetColor, Vec<TaskEndpoint>>,
    weights: TrafficSplit,
    /// Every weight split applied, in order. Steady state is not
    /// recorded; only mutations land here.
    weight_history: Vec<TrafficSplit>,
    fail_next_launch: Option<String>,
    fail_next_shift: Option<String>,
}

/// Simulated cluster, load balancer, and registry in one handle.
///
/// Clones share state, so a test can hold one handle while the driver
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<Mutex<MemoryClusterInner>>,
}

impl MemoryCluster {
    /// A cluster whose listener currently sends 100% to `live`.
    pub fn with_live(live: TargetColor) -> Self {
        let cluster = Self::default();
        cluster.inner.lock().unwrap().weights = TrafficSplit::full(live);
        cluster
    }

    /// Current listener weight split.
    pub fn weights(&self) -> TrafficSplit {
        self.inner.lock().unwrap().weights
    }

    /// Every split applied through the backend, oldest first.
    pub fn weight_history(&self) -> Vec<TrafficSplit> {
        self.inner.lock().unwrap().weight_history.clone()
    }

    /// Endpoints currently attached to `color`.
    pub fn members(&self, color: TargetColor) -> Vec<TaskEndpoint> {
        self.inner
            .lock()
            .unwrap()
            .members
            .get(&color)
            .cloned()
            .unwrap_or_default()
    }

    /// Registered `(family, revision)` pairs, in registration order.
    pub fn revisions(&self) -> Vec<(String, u32)> {
        self.inner.lock().unwrap().revisions.clone()
    }

    /// Make the next `launch_tasks` call fail with `reason`.
    pub fn fail_next_launch(&self, reason: &str) {
        self.inner.lock().unwrap().fail_next_launch = Some(reason.to_string());
    }

    /// Make the next `set_listener_weights` call fail with `reason`.
    pub fn fail_next_shift(&self, reason: &str) {
        self.inner.lock().unwrap().fail_next_shift = Some(reason.to_string());
    }
}

impl ClusterBackend for MemoryCluster {
    async fn register_task_definition(
        &self,
        definition: &TaskDefinition,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .revisions
            .push((definition.family.clone(), definition.revision));
        debug!(
            family = %definition.family,
            revision = definition.revision,
            "registered task definition"
        );
        Ok(())
    }

    async fn launch_tasks(
        &self,
        service: &str,
        definition: &TaskDefinition,
        color: TargetColor,
        count: u32,
    ) -> Result<Vec<TaskEndpoint>, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(reason) = inner.fail_next_launch.take() {
            return Err(BackendError(reason));
        }

        // Deterministic addressing: the color picks the /24.
        let octet = match color {
            TargetColor::Blue => 1,
            TargetColor::Green => 2,
        };
        let endpoints: Vec<TaskEndpoint> = (0..count)
            .map(|i| format!("10.0.{octet}.{}:{}", i + 10, definition.container_port))
            .collect();
        inner.members.insert(color, endpoints.clone());
        debug!(%service, %color, tasks = count, "launched tasks");
        Ok(endpoints)
    }

    async fn set_listener_weights(
        &self,
        service: &str,
        split: TrafficSplit,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(reason) = inner.fail_next_shift.take() {
            return Err(BackendError(reason));
        }
        inner.weights = split;
        inner.weight_history.push(split);
        debug!(%service, blue = split.blue, green = split.green, "listener weights set");
        Ok(())
    }

    async fn retire_targets(
        &self,
        service: &str,
        color: TargetColor,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.members.remove(&color);
        debug!(%service, %color, "retired targets");
        Ok(())
    }
}

/// Prober that returns the same result for every endpoint.
#[derive(Debug, Clone, Copy)]
pub struct StaticProber(pub ProbeResult);

impl Prober for StaticProber {
    async fn probe(&self, _endpoint: &str, _path: &str, _timeout: Duration) -> ProbeResult {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::ImageRef;

    fn definition() -> TaskDefinition {
        TaskDefinition {
            family: "storefront".to_string(),
            revision: 2,
            image: ImageRef::new("registry.example.com/storefront", "v2"),
            cpu: 256,
            memory_mib: 512,
            container_port: 80,
            log_stream_prefix: None,
            task_role: None,
            execution_role: None,
        }
    }

    #[tokio::test]
    async fn launch_and_retire_round_trip() {
        let cluster = MemoryCluster::with_live(TargetColor::Blue);
        let endpoints = cluster
            .launch_tasks("storefront", &definition(), TargetColor::Green, 3)
            .await
            .unwrap();
        assert_eq!(endpoints.len(), 3);
        assert_eq!(cluster.members(TargetColor::Green), endpoints);

        cluster
            .retire_targets("storefront", TargetColor::Green)
            .await
            .unwrap();
        assert!(cluster.members(TargetColor::Green).is_empty());
    }

    #[tokio::test]
    async fn weight_history_records_each_mutation() {
        let cluster = MemoryCluster::with_live(TargetColor::Blue);
        assert!(cluster.weight_history().is_empty());

        cluster
            .set_listener_weights("storefront", TrafficSplit::split(TargetColor::Green, 10))
            .await
            .unwrap();
        cluster
            .set_listener_weights("storefront", TrafficSplit::full(TargetColor::Green))
            .await
            .unwrap();

        assert_eq!(cluster.weights(), TrafficSplit::full(TargetColor::Green));
        assert_eq!(cluster.weight_history().len(), 2);
    }

    #[tokio::test]
    async fn injected_faults_fire_once() {
        let cluster = MemoryCluster::with_live(TargetColor::Blue);
        cluster.fail_next_launch("no capacity");

        let err = cluster
            .launch_tasks("storefront", &definition(), TargetColor::Green, 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no capacity"));

        // The fault is consumed.
        cluster
            .launch_tasks("storefront", &definition(), TargetColor::Green, 1)
            .await
            .unwrap();
    }
}
