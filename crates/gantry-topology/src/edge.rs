//! Edge load balancer, listeners, security policy, DNS and TLS bindings.

use serde::{Deserialize, Serialize};
use tracing::debug;

use gantry_core::TargetColor;

use crate::error::{TopologyError, TopologyResult};
use crate::network::Network;

/// A single ingress admission rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub port: u16,
    /// Source CIDR admitted on this port.
    pub source_cidr: String,
}

/// Inbound/outbound policy attached to the load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub ingress: Vec<SecurityRule>,
    pub allow_all_outbound: bool,
}

impl SecurityPolicy {
    /// HTTP(80) and HTTPS(443) from any source, all outbound permitted.
    pub fn web_defaults() -> Self {
        Self {
            ingress: vec![
                SecurityRule {
                    port: 80,
                    source_cidr: "0.0.0.0/0".to_string(),
                },
                SecurityRule {
                    port: 443,
                    source_cidr: "0.0.0.0/0".to_string(),
                },
            ],
            allow_all_outbound: true,
        }
    }

    pub fn admits(&self, port: u16) -> bool {
        self.ingress.iter().any(|r| r.port == port)
    }
}

/// Reference to a hosted DNS zone (external collaborator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZoneRef {
    pub id: String,
    pub zone_name: String,
}

/// The stable DNS alias resolving to the load balancer.
///
/// Alias planning is idempotent: the same configuration always yields
/// the same single record, never a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsAlias {
    pub zone: HostedZoneRef,
    pub record_name: String,
}

/// Reference to a pre-issued TLS certificate (external collaborator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRef {
    pub id: String,
}

/// A port-bound traffic rule with a default target color.
///
/// At steady state a listener routes 100% of its traffic to exactly
/// one target set. Only the rollout driver may move that pointer, and
/// only through the declared shift schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub port: u16,
    pub default_target: TargetColor,
}

/// The internet-facing layer-7 entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub name: String,
    pub internet_facing: bool,
    /// Names of the public subnets the balancer is placed in.
    pub subnets: Vec<String>,
    pub security: SecurityPolicy,
    pub dns: DnsAlias,
    pub certificate: CertificateRef,
    pub listeners: Vec<Listener>,
}

impl LoadBalancer {
    pub fn builder(name: &str) -> LoadBalancerBuilder {
        LoadBalancerBuilder {
            name: name.to_string(),
            subnets: Vec::new(),
            security: SecurityPolicy::web_defaults(),
            dns: None,
            certificate: None,
            listeners: Vec::new(),
        }
    }

    /// The listener whose default-target pointer the rollout mutates:
    /// the lowest-port one. Any others are shadow wiring.
    pub fn primary_listener(&self) -> &Listener {
        self.listeners
            .iter()
            .min_by_key(|l| l.port)
            .expect("load balancer built without listeners")
    }
}

/// Builder holding typed references until validation at `build`.
pub struct LoadBalancerBuilder {
    name: String,
    subnets: Vec<String>,
    security: SecurityPolicy,
    dns: Option<DnsAlias>,
    certificate: Option<CertificateRef>,
    listeners: Vec<Listener>,
}

impl LoadBalancerBuilder {
    /// Place the balancer in the network's public tier.
    pub fn network(mut self, network: &Network) -> Self {
        self.subnets = network
            .public_subnets()
            .iter()
            .map(|s| s.name.clone())
            .collect();
        self
    }

    pub fn security(mut self, policy: SecurityPolicy) -> Self {
        self.security = policy;
        self
    }

    pub fn dns(mut self, zone: HostedZoneRef, record_name: &str) -> Self {
        self.dns = Some(DnsAlias {
            zone,
            record_name: record_name.to_string(),
        });
        self
    }

    pub fn certificate(mut self, id: &str) -> Self {
        self.certificate = Some(CertificateRef { id: id.to_string() });
        self
    }

    pub fn listener(mut self, port: u16, default_target: TargetColor) -> Self {
        self.listeners.push(Listener {
            port,
            default_target,
        });
        self
    }

    pub fn build(self) -> TopologyResult<LoadBalancer> {
        if self.name.is_empty() {
            return Err(TopologyError::EmptyField { field: "edge.name" });
        }
        if self.subnets.is_empty() {
            return Err(TopologyError::NoPublicTier { name: self.name });
        }
        if self.listeners.is_empty() {
            return Err(TopologyError::NoListeners { name: self.name });
        }
        let mut seen = std::collections::HashSet::new();
        for listener in &self.listeners {
            if !seen.insert(listener.port) {
                return Err(TopologyError::DuplicateListenerPort {
                    port: listener.port,
                });
            }
        }
        let dns = self.dns.ok_or(TopologyError::EmptyField {
            field: "edge.record_name",
        })?;
        let certificate = self.certificate.ok_or(TopologyError::EmptyField {
            field: "edge.certificate_id",
        })?;

        debug!(name = %self.name, listeners = self.listeners.len(), "load balancer built");
        Ok(LoadBalancer {
            name: self.name,
            internet_facing: true,
            subnets: self.subnets,
            security: self.security,
            dns,
            certificate,
            listeners: self.listeners,
        })
    }
}
