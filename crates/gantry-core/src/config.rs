//! gantry.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::types::{CanaryPolicy, ShiftSchedule};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GantryConfig {
    pub service: ServiceConfig,
    pub network: NetworkConfig,
    pub edge: EdgeConfig,
    pub targets: TargetsConfig,
    pub registry: RegistryConfig,
    pub source: Option<SourceConfig>,
    pub build: Option<BuildConfig>,
    pub rollout: Option<RolloutConfig>,
}

/// The deployed application and its compute placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub cluster: String,
    pub desired_count: u32,
    /// CPU units per task.
    pub cpu: u32,
    /// Memory per task in MiB.
    pub memory_mib: u32,
    pub container_port: u16,
    pub log_stream_prefix: Option<String>,
    pub task_role: Option<String>,
    pub execution_role: Option<String>,
    /// Who drives rollouts. Blue-green hands the cutover to the
    /// rollout controller; rolling lets the cluster replace in place.
    #[serde(default)]
    pub deployment_mode: DeploymentMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    #[default]
    Rolling,
    BlueGreen,
}

/// The isolation boundary: one parent CIDR carved into subnet tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: Option<String>,
    /// Parent CIDR block, e.g. "12.10.0.0/16".
    pub cidr: String,
    /// Availability zones to spread subnets across.
    pub az_count: u32,
    /// Prefix length for each carved subnet (e.g. 24).
    pub subnet_prefix: Option<u8>,
}

/// The internet-facing entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub name: String,
    pub hosted_zone_id: String,
    pub zone_name: String,
    /// DNS alias that resolves to the load balancer.
    pub record_name: String,
    /// Pre-issued TLS certificate, by identifier.
    pub certificate_id: String,
    #[serde(rename = "listener")]
    pub listeners: Vec<ListenerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub port: u16,
    /// Which color receives default traffic at steady state.
    pub default_target: crate::types::TargetColor,
}

/// Shape shared by both target sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetsConfig {
    pub port: u16,
    pub health_path: String,
    /// Probe interval, e.g. "5s".
    pub health_interval: Option<String>,
    /// Per-probe timeout, e.g. "2s".
    pub health_timeout: Option<String>,
    pub unhealthy_threshold: Option<u32>,
}

/// Image registry collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry host, e.g. "registry.example.com".
    pub host: String,
    pub repository: String,
    pub region: String,
    pub account: String,
}

/// Source-control collaborator: pipeline triggers on branch update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Name of the secret holding the access token.
    pub token_secret: String,
    /// Key within the secret.
    pub token_key: String,
}

/// Externally authored build instructions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Command run inside the source checkout, e.g. ["sh", "build.sh"].
    pub command: Vec<String>,
    /// Tag applied to the produced image (defaults to the source revision).
    pub image_tag: Option<String>,
    /// Extra variables exposed to the build, on top of the standard three.
    pub env: Option<HashMap<String, String>>,
}

/// Rollout behavior and deployment descriptor locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Seconds to wait for replacement tasks to pass health checks.
    pub health_timeout_secs: Option<u64>,
    /// Task definition template path within the source checkout.
    pub task_definition_template: Option<String>,
    /// Rollout spec template path within the source checkout.
    pub rollout_spec_template: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    #[default]
    Canary,
    AllAtOnce,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub kind: ScheduleKind,
    pub canary_percent: Option<u32>,
    pub bake_secs: Option<u64>,
}

impl ScheduleConfig {
    /// Resolve the configured schedule, filling defaults.
    pub fn to_schedule(&self) -> ShiftSchedule {
        match self.kind {
            ScheduleKind::AllAtOnce => ShiftSchedule::AllAtOnce,
            ScheduleKind::Canary => {
                let defaults = CanaryPolicy::default();
                ShiftSchedule::Canary(CanaryPolicy {
                    canary_percent: self.canary_percent.unwrap_or(defaults.canary_percent),
                    bake_secs: self.bake_secs.unwrap_or(defaults.bake_secs),
                })
            }
        }
    }
}

impl GantryConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: GantryConfig = toml::from_str(content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal gantry.toml for the given service.
    pub fn scaffold(name: &str, domain: &str) -> Self {
        GantryConfig {
            service: ServiceConfig {
                name: name.to_string(),
                cluster: format!("{name}-cluster"),
                desired_count: 2,
                cpu: 256,
                memory_mib: 512,
                container_port: 80,
                log_stream_prefix: Some(name.to_string()),
                task_role: None,
                execution_role: None,
                deployment_mode: DeploymentMode::BlueGreen,
            },
            network: NetworkConfig {
                name: None,
                cidr: "10.0.0.0/16".to_string(),
                az_count: 3,
                subnet_prefix: Some(24),
            },
            edge: EdgeConfig {
                name: format!("{name}-edge"),
                hosted_zone_id: "ZONE_ID".to_string(),
                zone_name: domain.to_string(),
                record_name: format!("{name}.{domain}"),
                certificate_id: "CERTIFICATE_ID".to_string(),
                listeners: vec![ListenerConfig {
                    port: 80,
                    default_target: crate::types::TargetColor::Blue,
                }],
            },
            targets: TargetsConfig {
                port: 80,
                health_path: "/healthz".to_string(),
                health_interval: Some("5s".to_string()),
                health_timeout: Some("2s".to_string()),
                unhealthy_threshold: Some(3),
            },
            registry: RegistryConfig {
                host: "registry.example.com".to_string(),
                repository: name.to_string(),
                region: "us-east-2".to_string(),
                account: "000000000000".to_string(),
            },
            source: None,
            build: None,
            rollout: Some(RolloutConfig {
                schedule: ScheduleConfig::default(),
                health_timeout_secs: Some(120),
                task_definition_template: Some("taskdef.json".to_string()),
                rollout_spec_template: Some("rolloutspec.yaml".to_string()),
            }),
        }
    }
}
