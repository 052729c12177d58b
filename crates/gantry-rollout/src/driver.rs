//! Rollout driver — executes the state machine against a cluster.
//!
//! The driver is the only writer of the listener's default-target
//! weights. It persists every status change as a `RolloutRecord`, and
//! it suspends in exactly two places: the health gate during
//! `Provisioning` and the bake timer during `Monitoring`, both raced
//! against the external rollback signal.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use gantry_core::{TargetColor, TaskEndpoint, epoch_secs};
use gantry_health::{GateError, Prober, ReadinessGate};
use gantry_state::{
    RolloutRecord, RolloutStatus, ServiceState, StateError, StateStore, TargetSetState,
};
use gantry_topology::{TaskDefinition, Topology};

use crate::controller::{RolloutAction, RolloutEvent, RolloutMachine, RolloutPhase};

/// Error from the compute/edge substrate.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

/// An atomic weight split across the target pair.
///
/// Weights are integer percentages summing to 100; the listener is
/// never left in a partial state between two splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSplit {
    pub blue: u32,
    pub green: u32,
}

impl TrafficSplit {
    /// 100% to one color.
    pub fn full(color: TargetColor) -> Self {
        Self::split(color, 100)
    }

    /// `percent` to `color`, the remainder to the other.
    pub fn split(color: TargetColor, percent: u32) -> Self {
        match color {
            TargetColor::Blue => Self {
                blue: percent,
                green: 100 - percent,
            },
            TargetColor::Green => Self {
                blue: 100 - percent,
                green: percent,
            },
        }
    }

    pub fn weight(&self, color: TargetColor) -> u32 {
        match color {
            TargetColor::Blue => self.blue,
            TargetColor::Green => self.green,
        }
    }
}

impl Default for TrafficSplit {
    fn default() -> Self {
        TrafficSplit::full(TargetColor::Blue)
    }
}

/// The seam to the actual cluster, load balancer, and registry plane.
pub trait ClusterBackend: Send + Sync {
    /// Register an immutable task definition revision.
    fn register_task_definition(
        &self,
        definition: &TaskDefinition,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Launch `count` tasks of `definition` registered into `color`.
    /// Returns their endpoints once all are placed.
    fn launch_tasks(
        &self,
        service: &str,
        definition: &TaskDefinition,
        color: TargetColor,
        count: u32,
    ) -> impl Future<Output = Result<Vec<TaskEndpoint>, BackendError>> + Send;

    /// Atomically replace the primary listener's weight split.
    fn set_listener_weights(
        &self,
        service: &str,
        split: TrafficSplit,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Deregister and stop every task in `color`.
    fn retire_targets(
        &self,
        service: &str,
        color: TargetColor,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// One rollout request: the replacement revision plus provenance.
#[derive(Debug, Clone)]
pub struct RolloutRequest {
    pub rollout_id: String,
    pub source_revision: String,
    /// The new immutable revision (already derived from the family).
    pub definition: TaskDefinition,
}

/// Terminal result of a driven rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RolloutOutcome {
    /// Cutover complete; the replacement color is live.
    Completed,
    /// Traffic reverted during the bake window.
    RolledBack { reason: String },
    /// Failed without disturbing the pre-rollout steady state.
    Failed { reason: String },
}

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("rollout already in progress for service {service}")]
    Conflict { service: String },

    #[error("service {0} is not in blue-green deployment mode")]
    NotRolloutControlled(String),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Drives rollouts for one topology.
pub struct RolloutDriver<B, P> {
    backend: B,
    prober: P,
    state: StateStore,
    gate: ReadinessGate,
    /// Bounded wait for the whole replacement pool to pass health checks.
    health_timeout: Duration,
}

impl<B: ClusterBackend, P: Prober> RolloutDriver<B, P> {
    pub fn new(backend: B, prober: P, state: StateStore, topology: &Topology) -> Self {
        let health = &topology.targets.blue.health;
        let mut gate = ReadinessGate::new(&health.path);
        gate.unhealthy_threshold = health.unhealthy_threshold;
        if let Some(interval) = health
            .interval
            .as_deref()
            .and_then(gantry_health::checker::parse_duration)
        {
            gate.probe_interval = interval;
        }
        if let Some(timeout) = health
            .timeout
            .as_deref()
            .and_then(gantry_health::checker::parse_duration)
        {
            gate.probe_timeout = timeout;
        }

        Self {
            backend,
            prober,
            state,
            gate,
            health_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    /// Override gate polling (tests use millisecond cadences).
    pub fn with_gate(mut self, gate: ReadinessGate) -> Self {
        self.gate = gate;
        self
    }

    /// Execute one rollout to a terminal state.
    ///
    /// `rollback` is the external rollback/abort signal. During
    /// `Monitoring` it triggers the defined `RolledBack` transition;
    /// earlier it forces a failure with cleanup.
    pub async fn execute(
        &self,
        topology: &Topology,
        request: RolloutRequest,
        mut rollback: watch::Receiver<bool>,
    ) -> Result<RolloutOutcome, RolloutError> {
        let service = topology.service.name.clone();
        if !topology.service.rollout_controlled() {
            return Err(RolloutError::NotRolloutControlled(service));
        }

        // Live color comes from persisted steady state when present,
        // otherwise from the topology's initial attachment.
        let live = match self.state.get_service(&service)? {
            Some(state) => state.live_target,
            None => topology.service.attached_target,
        };

        let mut machine = RolloutMachine::new(&service, live, topology.schedule.clone());
        let mut record = RolloutRecord {
            id: request.rollout_id.clone(),
            service: service.clone(),
            source_revision: request.source_revision.clone(),
            family: request.definition.family.clone(),
            revision: request.definition.revision,
            schedule: topology.schedule.clone(),
            status: RolloutStatus::Created,
            phase: machine.phase().as_str().to_string(),
            reason: None,
            created_at: epoch_secs(),
            updated_at: epoch_secs(),
        };

        // Atomic admission: at most one non-terminal rollout per service.
        match self.state.create_rollout(&record) {
            Ok(()) => {}
            Err(StateError::Conflict { service, .. }) => {
                return Err(RolloutError::Conflict { service });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            %service,
            rollout = %record.id,
            live = %live,
            replacement = %machine.replacement(),
            "rollout admitted"
        );

        // ── Provisioning ───────────────────────────────────────────
        let action = machine
            .handle(RolloutEvent::Start)
            .expect("Start is valid in Created");
        let RolloutAction::LaunchReplacement { target } = action else {
            unreachable!();
        };
        self.persist(&mut record, &machine)?;

        let endpoints = match self.provision(topology, &request, target).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                let action = machine
                    .handle(RolloutEvent::Fault(e.to_string()))
                    .expect("Fault is valid in Provisioning");
                return self
                    .settle(topology, &mut machine, &mut record, action)
                    .await;
            }
        };
        self.store_members(&service, target, endpoints.clone())?;

        // Health gate, raced against the abort signal.
        let gate_result = tokio::select! {
            result = self
                .gate
                .await_all_healthy(&self.prober, &endpoints, self.health_timeout) => Some(result),
            _ = signalled(&mut rollback) => None,
        };

        let event = match gate_result {
            Some(Ok(())) => RolloutEvent::ReplacementHealthy,
            Some(Err(GateError::Timeout { unready })) => {
                warn!(%service, ?unready, "health gate timed out");
                RolloutEvent::HealthTimeout
            }
            None => RolloutEvent::RollbackSignal,
        };
        let (to, percent) = match machine
            .handle(event)
            .expect("gate outcomes are valid in Provisioning")
        {
            RolloutAction::ShiftCanary { to, percent } => (to, percent),
            action => {
                return self
                    .settle(topology, &mut machine, &mut record, action)
                    .await;
            }
        };
        self.persist(&mut record, &machine)?;

        // ── Shifting ───────────────────────────────────────────────
        // A late abort beats the canary split.
        if *rollback.borrow() {
            let action = machine
                .handle(RolloutEvent::RollbackSignal)
                .expect("RollbackSignal is valid in Shifting");
            return self
                .settle(topology, &mut machine, &mut record, action)
                .await;
        }

        let split = TrafficSplit::split(to, percent);
        if let Err(e) = self.backend.set_listener_weights(&service, split).await {
            let action = machine
                .handle(RolloutEvent::Fault(e.to_string()))
                .expect("Fault is valid in Shifting");
            return self
                .settle(topology, &mut machine, &mut record, action)
                .await;
        }
        info!(%service, canary = percent, "canary traffic shifted");

        let action = machine
            .handle(RolloutEvent::CanaryShifted)
            .expect("CanaryShifted is valid in Shifting");
        let RolloutAction::StartBake { duration } = action else {
            unreachable!();
        };
        self.persist(&mut record, &machine)?;

        // ── Monitoring ─────────────────────────────────────────────
        let event = tokio::select! {
            _ = tokio::time::sleep(duration) => RolloutEvent::BakeElapsed,
            _ = signalled(&mut rollback) => RolloutEvent::RollbackSignal,
        };
        let action = machine
            .handle(event)
            .expect("bake outcomes are valid in Monitoring");
        self.settle(topology, &mut machine, &mut record, action).await
    }

    /// Register the revision and launch the replacement tasks.
    async fn provision(
        &self,
        topology: &Topology,
        request: &RolloutRequest,
        target: TargetColor,
    ) -> Result<Vec<TaskEndpoint>, BackendError> {
        self.backend
            .register_task_definition(&request.definition)
            .await?;
        self.backend
            .launch_tasks(
                &topology.service.name,
                &request.definition,
                target,
                topology.service.desired_count,
            )
            .await
    }

    /// Execute a terminal action and finalize the record.
    async fn settle(
        &self,
        topology: &Topology,
        machine: &mut RolloutMachine,
        record: &mut RolloutRecord,
        action: RolloutAction,
    ) -> Result<RolloutOutcome, RolloutError> {
        let service = &topology.service.name;

        match &action {
            RolloutAction::PromoteRemainder { to } => {
                let to = *to;
                // Remainder shift, then drain the old live set. Ownership
                // of the membership returns to the service here.
                self.try_backend(
                    service,
                    self.backend.set_listener_weights(service, TrafficSplit::full(to)),
                )
                .await;
                self.try_backend(service, self.backend.retire_targets(service, to.other()))
                    .await;
                self.store_members(service, to.other(), Vec::new())?;
                self.state.put_service(&ServiceState {
                    name: service.clone(),
                    live_target: to,
                    task_definition_revision: record.revision,
                    desired_count: topology.service.desired_count,
                    updated_at: epoch_secs(),
                })?;
                info!(%service, live = %to, "cutover completed");
            }
            RolloutAction::Revert { restore, cleanup } => {
                // Atomic revert: all weight back to the original live set.
                self.try_backend(
                    service,
                    self.backend
                        .set_listener_weights(service, TrafficSplit::full(*restore)),
                )
                .await;
                self.try_backend(service, self.backend.retire_targets(service, *cleanup))
                    .await;
                self.store_members(service, *cleanup, Vec::new())?;
                warn!(%service, restored = %restore, "traffic reverted");
            }
            RolloutAction::Cleanup { target } => {
                // Nothing was ever shifted; only drain the replacement.
                self.try_backend(service, self.backend.retire_targets(service, *target))
                    .await;
                self.store_members(service, *target, Vec::new())?;
            }
            other => unreachable!("non-terminal action {other:?} in settle"),
        }

        let outcome = match machine.phase() {
            RolloutPhase::Completed => RolloutOutcome::Completed,
            RolloutPhase::RolledBack => RolloutOutcome::RolledBack {
                reason: machine.reason().unwrap_or("rollback").to_string(),
            },
            RolloutPhase::Failed => RolloutOutcome::Failed {
                reason: machine.reason().unwrap_or("failure").to_string(),
            },
            phase => unreachable!("settle in non-terminal phase {phase:?}"),
        };
        self.persist(record, machine)?;
        Ok(outcome)
    }

    /// Persist the record to match the machine.
    fn persist(
        &self,
        record: &mut RolloutRecord,
        machine: &RolloutMachine,
    ) -> Result<(), RolloutError> {
        record.phase = machine.phase().as_str().to_string();
        record.status = match machine.phase() {
            RolloutPhase::Created => RolloutStatus::Created,
            RolloutPhase::Provisioning | RolloutPhase::Shifting | RolloutPhase::Monitoring => {
                RolloutStatus::InProgress
            }
            RolloutPhase::Completed => RolloutStatus::Succeeded,
            RolloutPhase::RolledBack => RolloutStatus::RolledBack,
            RolloutPhase::Failed => RolloutStatus::Failed,
        };
        record.reason = machine.reason().map(str::to_string);
        record.updated_at = epoch_secs();
        self.state.put_rollout(record)?;
        Ok(())
    }

    fn store_members(
        &self,
        service: &str,
        color: TargetColor,
        members: Vec<TaskEndpoint>,
    ) -> Result<(), RolloutError> {
        self.state.put_target_set(&TargetSetState {
            service: service.to_string(),
            color,
            members,
            updated_at: epoch_secs(),
        })?;
        Ok(())
    }

    /// Best-effort backend call on an already-terminal path: a cleanup
    /// failure must not mask the rollout outcome.
    async fn try_backend<F>(&self, service: &str, fut: F)
    where
        F: Future<Output = Result<(), BackendError>>,
    {
        if let Err(e) = fut.await {
            error!(%service, error = %e, "backend call failed during settlement");
        }
    }
}

/// Resolves once the watch channel observes `true`.
async fn signalled(rx: &mut watch::Receiver<bool>) {
    if *rx.borrow() {
        return;
    }
    loop {
        if rx.changed().await.is_err() {
            // Sender dropped: no signal can ever arrive.
            std::future::pending::<()>().await;
        }
        if *rx.borrow() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use gantry_core::config::GantryConfig;
    use gantry_core::{CanaryPolicy, ShiftSchedule};
    use gantry_health::ProbeResult;

    use crate::memory::{MemoryCluster, StaticProber};

    fn topology(bake_secs: u64) -> Topology {
        let mut config = GantryConfig::scaffold("storefront", "example.com");
        config.rollout.as_mut().unwrap().schedule.bake_secs = Some(bake_secs);
        let (mut topology, _) = Topology::from_config(&config).unwrap();
        topology.schedule = ShiftSchedule::Canary(CanaryPolicy {
            canary_percent: 10,
            bake_secs,
        });
        topology
    }

    fn request(revision: u32) -> RolloutRequest {
        let config = GantryConfig::scaffold("storefront", "example.com");
        let (topology, _) = Topology::from_config(&config).unwrap();
        let mut definition = topology.task_definition.clone();
        definition.revision = revision;
        definition.image.tag = format!("v{revision}");
        RolloutRequest {
            rollout_id: format!("r-{revision}"),
            source_revision: "abc123".to_string(),
            definition,
        }
    }

    fn fast_gate() -> ReadinessGate {
        let mut gate = ReadinessGate::new("/healthz");
        gate.probe_interval = Duration::from_millis(5);
        gate.probe_timeout = Duration::from_millis(5);
        gate
    }

    fn driver(
        backend: MemoryCluster,
        prober: StaticProber,
        state: StateStore,
        topology: &Topology,
    ) -> RolloutDriver<MemoryCluster, StaticProber> {
        RolloutDriver::new(backend, prober, state, topology)
            .with_gate(fast_gate())
            .with_health_timeout(Duration::from_millis(50))
    }

    fn no_signal() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        // Keep the sender alive for the test's duration.
        std::mem::forget(tx);
        rx
    }

    #[tokio::test]
    async fn completed_rollout_swaps_colors_and_drains_old() {
        let topology = topology(0);
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        let state = StateStore::open_in_memory().unwrap();
        let driver = driver(
            backend.clone(),
            StaticProber(ProbeResult::Healthy),
            state.clone(),
            &topology,
        );

        let outcome = driver
            .execute(&topology, request(2), no_signal())
            .await
            .unwrap();

        assert_eq!(outcome, RolloutOutcome::Completed);
        assert_eq!(backend.weights(), TrafficSplit::full(TargetColor::Green));
        // The previously-live set has zero attached tasks.
        assert!(backend.members(TargetColor::Blue).is_empty());
        assert!(!backend.members(TargetColor::Green).is_empty());

        let record = state.get_rollout("storefront", "r-2").unwrap().unwrap();
        assert_eq!(record.status, RolloutStatus::Succeeded);
        assert_eq!(record.phase, "completed");

        let service = state.get_service("storefront").unwrap().unwrap();
        assert_eq!(service.live_target, TargetColor::Green);
        assert_eq!(service.task_definition_revision, 2);
    }

    #[tokio::test]
    async fn canary_split_applies_before_promote() {
        let topology = topology(0);
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        let state = StateStore::open_in_memory().unwrap();
        let driver = driver(
            backend.clone(),
            StaticProber(ProbeResult::Healthy),
            state,
            &topology,
        );

        driver
            .execute(&topology, request(2), no_signal())
            .await
            .unwrap();

        // Exactly two weight mutations: the 90/10 canary split, then
        // the full promote. Never anything in between.
        let history = backend.weight_history();
        assert_eq!(
            history,
            vec![
                TrafficSplit { blue: 90, green: 10 },
                TrafficSplit { blue: 0, green: 100 },
            ]
        );
    }

    #[tokio::test]
    async fn promote_waits_out_the_full_bake() {
        let topology = topology(1);
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        let state = StateStore::open_in_memory().unwrap();
        let driver = driver(
            backend.clone(),
            StaticProber(ProbeResult::Healthy),
            state,
            &topology,
        );

        let started = Instant::now();
        let outcome = driver
            .execute(&topology, request(2), no_signal())
            .await
            .unwrap();

        assert_eq!(outcome, RolloutOutcome::Completed);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn health_timeout_fails_with_zero_traffic_shifted() {
        let topology = topology(0);
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        let state = StateStore::open_in_memory().unwrap();
        let driver = driver(
            backend.clone(),
            StaticProber(ProbeResult::Failed),
            state.clone(),
            &topology,
        );

        let outcome = driver
            .execute(&topology, request(2), no_signal())
            .await
            .unwrap();

        assert!(matches!(outcome, RolloutOutcome::Failed { .. }));
        // Listener untouched and replacement drained.
        assert_eq!(backend.weights(), TrafficSplit::full(TargetColor::Blue));
        assert!(backend.weight_history().is_empty());
        assert!(backend.members(TargetColor::Green).is_empty());

        let record = state.get_rollout("storefront", "r-2").unwrap().unwrap();
        assert_eq!(record.status, RolloutStatus::Failed);
        assert!(record.reason.unwrap().contains("health"));
    }

    #[tokio::test]
    async fn rollback_signal_during_bake_reverts_atomically() {
        let topology = topology(5);
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        let state = StateStore::open_in_memory().unwrap();
        let driver = driver(
            backend.clone(),
            StaticProber(ProbeResult::Healthy),
            state.clone(),
            &topology,
        );

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = tx.send(true);
        });

        let outcome = driver.execute(&topology, request(2), rx).await.unwrap();

        assert!(matches!(outcome, RolloutOutcome::RolledBack { .. }));
        assert_eq!(backend.weights(), TrafficSplit::full(TargetColor::Blue));
        assert!(backend.members(TargetColor::Green).is_empty());
        assert_eq!(
            backend.weight_history(),
            vec![
                TrafficSplit { blue: 90, green: 10 },
                TrafficSplit { blue: 100, green: 0 },
            ]
        );

        let record = state.get_rollout("storefront", "r-2").unwrap().unwrap();
        assert_eq!(record.status, RolloutStatus::RolledBack);
        // The service's steady state never moved off blue.
        assert!(state.get_service("storefront").unwrap().is_none());
    }

    #[tokio::test]
    async fn abort_during_provisioning_forces_failure_with_cleanup() {
        let topology = topology(0);
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        let state = StateStore::open_in_memory().unwrap();
        // Prober never reports healthy, long timeout: the abort wins.
        let driver = RolloutDriver::new(
            backend.clone(),
            StaticProber(ProbeResult::Unhealthy),
            state.clone(),
            &topology,
        )
        .with_gate(fast_gate())
        .with_health_timeout(Duration::from_secs(30));

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let outcome = driver.execute(&topology, request(2), rx).await.unwrap();

        assert!(matches!(outcome, RolloutOutcome::Failed { .. }));
        assert!(backend.weight_history().is_empty());
        assert!(backend.members(TargetColor::Green).is_empty());

        let record = state.get_rollout("storefront", "r-2").unwrap().unwrap();
        assert!(record.reason.unwrap().contains("abort"));
    }

    #[tokio::test]
    async fn launch_fault_fails_without_touching_traffic() {
        let topology = topology(0);
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        backend.fail_next_launch("no capacity");
        let state = StateStore::open_in_memory().unwrap();
        let driver = driver(
            backend.clone(),
            StaticProber(ProbeResult::Healthy),
            state.clone(),
            &topology,
        );

        let outcome = driver
            .execute(&topology, request(2), no_signal())
            .await
            .unwrap();

        match outcome {
            RolloutOutcome::Failed { reason } => assert!(reason.contains("no capacity")),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert!(backend.weight_history().is_empty());
    }

    #[tokio::test]
    async fn shift_fault_reverts_traffic_to_the_live_color() {
        let topology = topology(0);
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        backend.fail_next_shift("listener unavailable");
        let state = StateStore::open_in_memory().unwrap();
        let driver = driver(
            backend.clone(),
            StaticProber(ProbeResult::Healthy),
            state.clone(),
            &topology,
        );

        let outcome = driver
            .execute(&topology, request(2), no_signal())
            .await
            .unwrap();

        match outcome {
            RolloutOutcome::Failed { reason } => assert!(reason.contains("listener unavailable")),
            other => panic!("expected Failed, got {other:?}"),
        }
        // The canary split never applied; the only recorded mutation
        // is the restoring full shift back to blue.
        assert_eq!(
            backend.weight_history(),
            vec![TrafficSplit { blue: 100, green: 0 }]
        );
        assert_eq!(backend.weights(), TrafficSplit::full(TargetColor::Blue));
        assert!(backend.members(TargetColor::Green).is_empty());

        let record = state.get_rollout("storefront", "r-2").unwrap().unwrap();
        assert_eq!(record.status, RolloutStatus::Failed);
    }

    #[tokio::test]
    async fn second_rollout_is_rejected_while_first_is_active() {
        let topology = topology(0);
        let state = StateStore::open_in_memory().unwrap();

        // Simulate an in-flight rollout.
        state
            .create_rollout(&RolloutRecord {
                id: "r-1".to_string(),
                service: "storefront".to_string(),
                source_revision: "abc".to_string(),
                family: "storefront".to_string(),
                revision: 2,
                schedule: ShiftSchedule::default(),
                status: RolloutStatus::InProgress,
                phase: "shifting".to_string(),
                reason: None,
                created_at: 1,
                updated_at: 1,
            })
            .unwrap();

        let backend = MemoryCluster::with_live(TargetColor::Blue);
        let driver = driver(
            backend.clone(),
            StaticProber(ProbeResult::Healthy),
            state.clone(),
            &topology,
        );

        let err = driver
            .execute(&topology, request(3), no_signal())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::Conflict { .. }));

        // The first rollout's record is untouched and the backend saw
        // nothing.
        let first = state.get_rollout("storefront", "r-1").unwrap().unwrap();
        assert_eq!(first.phase, "shifting");
        assert!(backend.weight_history().is_empty());
    }

    #[tokio::test]
    async fn rolling_mode_service_is_refused() {
        let mut config = GantryConfig::scaffold("storefront", "example.com");
        config.service.deployment_mode = gantry_core::config::DeploymentMode::Rolling;
        let (topology, _) = Topology::from_config(&config).unwrap();

        let state = StateStore::open_in_memory().unwrap();
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        let driver = driver(
            backend,
            StaticProber(ProbeResult::Healthy),
            state,
            &topology,
        );

        let err = driver
            .execute(&topology, request(2), no_signal())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::NotRolloutControlled(_)));
    }

    #[tokio::test]
    async fn next_rollout_starts_from_the_new_live_color() {
        let topology = topology(0);
        let backend = MemoryCluster::with_live(TargetColor::Blue);
        let state = StateStore::open_in_memory().unwrap();
        let driver = driver(
            backend.clone(),
            StaticProber(ProbeResult::Healthy),
            state.clone(),
            &topology,
        );

        driver
            .execute(&topology, request(2), no_signal())
            .await
            .unwrap();
        driver
            .execute(&topology, request(3), no_signal())
            .await
            .unwrap();

        // Second rollout replaced green with blue.
        let service = state.get_service("storefront").unwrap().unwrap();
        assert_eq!(service.live_target, TargetColor::Blue);
        assert_eq!(service.task_definition_revision, 3);
        assert_eq!(backend.weights(), TrafficSplit::full(TargetColor::Blue));
        assert!(backend.members(TargetColor::Green).is_empty());
    }
}
