//! The topology graph: built once from configuration, validated, and
//! resolved into a dependency-ordered provision plan.
//!
//! There is no implicit resource registry: every resource holds typed
//! references to what it depends on, and the plan order falls out of
//! those references.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use gantry_core::config::{DeploymentMode, GantryConfig};
use gantry_core::{ShiftSchedule, TargetColor};

use crate::compute::{Cluster, Service, TaskDefinition};
use crate::edge::{HostedZoneRef, Listener, LoadBalancer};
use crate::error::{TopologyError, TopologyResult};
use crate::network::Network;
use crate::targets::{HealthCheckSpec, TargetPair};

/// Non-fatal findings surfaced during topology construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyWarning {
    /// An extra listener wired to its own default target alongside the
    /// canary schedule. Inconsistent with a single-listener weighted
    /// shift; the rollout driver ignores it.
    ShadowListener { port: u16, default_target: TargetColor },
    /// A shift schedule is configured but the service is in rolling
    /// mode, so the cluster would fight the rollout controller.
    RollingModeWithSchedule,
}

impl std::fmt::Display for TopologyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyWarning::ShadowListener {
                port,
                default_target,
            } => write!(
                f,
                "listener on port {port} (default {default_target}) is not rollout-controlled; \
                 likely leftover wiring"
            ),
            TopologyWarning::RollingModeWithSchedule => write!(
                f,
                "shift schedule configured but service deployment_mode is rolling"
            ),
        }
    }
}

/// The fully resolved deployment topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub network: Network,
    pub load_balancer: LoadBalancer,
    pub cluster: Cluster,
    pub service: Service,
    pub targets: TargetPair,
    /// Revision 1 of the task family; rollouts derive successors.
    pub task_definition: TaskDefinition,
    pub schedule: ShiftSchedule,
}

impl Topology {
    /// Build and validate the whole graph from configuration.
    ///
    /// Fails atomically: an invalid topology yields an error and no
    /// partial state, matching the all-or-nothing apply contract.
    pub fn from_config(
        config: &GantryConfig,
    ) -> TopologyResult<(Topology, Vec<TopologyWarning>)> {
        let mut warnings = Vec::new();

        let network_name = config
            .network
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-net", config.service.name));
        let network = Network::carve(
            &network_name,
            &config.network.cidr,
            config.network.az_count,
            config.network.subnet_prefix.unwrap_or(24),
        )?;

        let zone = HostedZoneRef {
            id: config.edge.hosted_zone_id.clone(),
            zone_name: config.edge.zone_name.clone(),
        };
        let mut builder = LoadBalancer::builder(&config.edge.name)
            .network(&network)
            .dns(zone, &config.edge.record_name)
            .certificate(&config.edge.certificate_id);
        for listener in &config.edge.listeners {
            builder = builder.listener(listener.port, listener.default_target);
        }
        let load_balancer = builder.build()?;

        let primary = *load_balancer.primary_listener();
        for listener in &load_balancer.listeners {
            if listener.port != primary.port {
                warn!(
                    port = listener.port,
                    default_target = %listener.default_target,
                    "shadow listener excluded from rollout control"
                );
                warnings.push(TopologyWarning::ShadowListener {
                    port: listener.port,
                    default_target: listener.default_target,
                });
            }
        }

        let schedule = config
            .rollout
            .as_ref()
            .map(|r| r.schedule.to_schedule())
            .unwrap_or_default();
        if let ShiftSchedule::Canary(policy) = &schedule
            && !policy.is_valid()
        {
            return Err(TopologyError::InvalidCanaryPercent {
                percent: policy.canary_percent,
            });
        }
        if config.rollout.is_some()
            && config.service.deployment_mode == DeploymentMode::Rolling
        {
            warnings.push(TopologyWarning::RollingModeWithSchedule);
        }

        let mut health = HealthCheckSpec::new(&config.targets.health_path, config.targets.port);
        health.interval = config.targets.health_interval.clone().or(health.interval);
        health.timeout = config.targets.health_timeout.clone().or(health.timeout);
        health.unhealthy_threshold = config
            .targets
            .unhealthy_threshold
            .unwrap_or(health.unhealthy_threshold);
        let targets = TargetPair::new(config.targets.port, health);

        let cluster = Cluster {
            name: config.service.cluster.clone(),
        };
        let task_definition = TaskDefinition {
            family: config.service.name.clone(),
            revision: 1,
            image: gantry_core::ImageRef::new(
                &format!("{}/{}", config.registry.host, config.registry.repository),
                "latest",
            ),
            cpu: config.service.cpu,
            memory_mib: config.service.memory_mib,
            container_port: config.service.container_port,
            log_stream_prefix: config.service.log_stream_prefix.clone(),
            task_role: config.service.task_role.clone(),
            execution_role: config.service.execution_role.clone(),
        };
        let service = Service {
            name: config.service.name.clone(),
            cluster: cluster.name.clone(),
            desired_count: config.service.desired_count,
            assign_public_ip: true,
            enable_execute_command: true,
            deployment_mode: config.service.deployment_mode,
            // Before any rollout, the primary listener's default is live.
            attached_target: primary.default_target,
        };

        let topology = Topology {
            network,
            load_balancer,
            cluster,
            service,
            targets,
            task_definition,
            schedule,
        };

        info!(
            service = %topology.service.name,
            listeners = topology.load_balancer.listeners.len(),
            warnings = warnings.len(),
            "topology resolved"
        );
        Ok((topology, warnings))
    }

    pub fn primary_listener(&self) -> &Listener {
        self.load_balancer.primary_listener()
    }

    /// Resolve the dependency-ordered provision plan.
    pub fn plan(&self) -> ProvisionPlan {
        let mut steps = Vec::new();
        let net = &self.network.name;
        let lb = &self.load_balancer.name;

        steps.push(ProvisionStep::new("network", net, &[]));
        steps.push(ProvisionStep::new(
            "security_policy",
            &format!("{lb}-policy"),
            &[net],
        ));
        steps.push(ProvisionStep::new(
            "load_balancer",
            lb,
            &[net, &format!("{lb}-policy")],
        ));
        for color in [TargetColor::Blue, TargetColor::Green] {
            steps.push(ProvisionStep::new(
                "target_set",
                &format!("{}-{color}", self.service.name),
                &[net],
            ));
        }
        for listener in &self.load_balancer.listeners {
            steps.push(ProvisionStep::new(
                "listener",
                &format!("{lb}-{}", listener.port),
                &[
                    lb,
                    &format!("{}-{}", self.service.name, listener.default_target),
                ],
            ));
        }
        steps.push(ProvisionStep::new(
            "dns_alias",
            &self.load_balancer.dns.record_name,
            &[lb],
        ));
        steps.push(ProvisionStep::new("cluster", &self.cluster.name, &[net]));
        steps.push(ProvisionStep::new(
            "task_definition",
            &format!(
                "{}:{}",
                self.task_definition.family, self.task_definition.revision
            ),
            &[],
        ));
        steps.push(ProvisionStep::new(
            "service",
            &self.service.name,
            &[
                &self.cluster.name,
                &format!(
                    "{}:{}",
                    self.task_definition.family, self.task_definition.revision
                ),
                &format!("{}-{}", self.service.name, self.service.attached_target),
            ],
        ));

        ProvisionPlan { steps }
    }
}

/// One resource in the ordered plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionStep {
    pub kind: String,
    pub name: String,
    pub depends_on: Vec<String>,
}

impl ProvisionStep {
    fn new(kind: &str, name: &str, depends_on: &[&str]) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Dependency-ordered sequence of resources to apply atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionPlan {
    steps: Vec<ProvisionStep>,
}

impl ProvisionPlan {
    pub fn steps(&self) -> &[ProvisionStep] {
        &self.steps
    }

    /// Every dependency must be satisfied by an earlier step.
    pub fn is_ordered(&self) -> bool {
        let mut provisioned = std::collections::HashSet::new();
        for step in &self.steps {
            if !step.depends_on.iter().all(|d| provisioned.contains(d)) {
                return false;
            }
            provisioned.insert(step.name.clone());
        }
        true
    }
}
