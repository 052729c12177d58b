//! Network boundary — a multi-AZ virtual network with two subnet tiers.
//!
//! The public tier is internet-routable; the isolated tier never is.
//! Subnets are carved deterministically from one parent CIDR block, one
//! subnet per tier per availability zone.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{TopologyError, TopologyResult};

/// Which tier a subnet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetTier {
    /// Internet-reachable; hosts the load balancer.
    Public,
    /// No inbound or outbound internet route.
    Isolated,
}

/// One carved subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub name: String,
    pub cidr: Ipv4Network,
    pub tier: SubnetTier,
    /// Availability zone label, e.g. "az-a".
    pub az: String,
}

impl Subnet {
    /// Public subnets always route to the internet; isolated never do.
    pub fn internet_routable(&self) -> bool {
        self.tier == SubnetTier::Public
    }
}

/// The isolation boundary owning its subnets exclusively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub cidr: Ipv4Network,
    pub azs: Vec<String>,
    pub subnets: Vec<Subnet>,
}

impl Network {
    /// Carve a network from a parent CIDR: one public and one isolated
    /// subnet per availability zone, each with the given prefix length.
    pub fn carve(
        name: &str,
        cidr: &str,
        az_count: u32,
        subnet_prefix: u8,
    ) -> TopologyResult<Self> {
        if name.is_empty() {
            return Err(TopologyError::EmptyField { field: "network.name" });
        }
        if az_count == 0 {
            return Err(TopologyError::NoAvailabilityZones);
        }

        let parent: Ipv4Network = cidr.parse().map_err(|e: ipnetwork::IpNetworkError| {
            TopologyError::InvalidCidr {
                cidr: cidr.to_string(),
                reason: e.to_string(),
            }
        })?;

        if subnet_prefix <= parent.prefix() || subnet_prefix > 30 {
            return Err(TopologyError::SubnetPrefixTooWide {
                prefix: subnet_prefix,
                parent_prefix: parent.prefix(),
            });
        }

        let needed = az_count * 2;
        let subnet_span = 1u64 << (32 - subnet_prefix);
        let parent_span = 1u64 << (32 - parent.prefix());
        if u64::from(needed) * subnet_span > parent_span {
            return Err(TopologyError::CidrExhausted {
                cidr: parent.to_string(),
                needed,
                prefix: subnet_prefix,
            });
        }

        let azs: Vec<String> = (0..az_count).map(az_label).collect();
        let base = u32::from(parent.network());
        let mut subnets = Vec::with_capacity(needed as usize);

        for (tier_index, tier) in [SubnetTier::Public, SubnetTier::Isolated]
            .into_iter()
            .enumerate()
        {
            for (az_index, az) in azs.iter().enumerate() {
                let offset = (tier_index as u32 * az_count + az_index as u32) as u64 * subnet_span;
                let addr = Ipv4Addr::from(base + offset as u32);
                let cidr = Ipv4Network::new(addr, subnet_prefix).map_err(|e| {
                    TopologyError::InvalidCidr {
                        cidr: format!("{addr}/{subnet_prefix}"),
                        reason: e.to_string(),
                    }
                })?;
                let tier_name = match tier {
                    SubnetTier::Public => "public",
                    SubnetTier::Isolated => "isolated",
                };
                subnets.push(Subnet {
                    name: format!("{name}-{tier_name}-{az}"),
                    cidr,
                    tier,
                    az: az.clone(),
                });
            }
        }

        let network = Network {
            name: name.to_string(),
            cidr: parent,
            azs,
            subnets,
        };
        network.validate()?;

        debug!(
            network = %network.name,
            cidr = %network.cidr,
            subnets = network.subnets.len(),
            "network carved"
        );
        Ok(network)
    }

    /// Check the tier invariants: every subnet inside the parent block,
    /// no two subnets overlapping.
    pub fn validate(&self) -> TopologyResult<()> {
        for subnet in &self.subnets {
            let last = last_address(&subnet.cidr);
            if !self.cidr.contains(subnet.cidr.network()) || !self.cidr.contains(last) {
                return Err(TopologyError::SubnetOutsideParent {
                    subnet: subnet.cidr.to_string(),
                    parent: self.cidr.to_string(),
                });
            }
        }

        for (i, a) in self.subnets.iter().enumerate() {
            for b in &self.subnets[i + 1..] {
                if cidrs_overlap(&a.cidr, &b.cidr) {
                    return Err(TopologyError::OverlappingSubnets {
                        a: a.name.clone(),
                        b: b.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn public_subnets(&self) -> Vec<&Subnet> {
        self.tier_subnets(SubnetTier::Public)
    }

    pub fn isolated_subnets(&self) -> Vec<&Subnet> {
        self.tier_subnets(SubnetTier::Isolated)
    }

    fn tier_subnets(&self, tier: SubnetTier) -> Vec<&Subnet> {
        self.subnets.iter().filter(|s| s.tier == tier).collect()
    }
}

/// Two CIDR-aligned blocks overlap iff one contains the other's base.
fn cidrs_overlap(a: &Ipv4Network, b: &Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

fn last_address(net: &Ipv4Network) -> Ipv4Addr {
    let span = (1u64 << (32 - net.prefix())) - 1;
    Ipv4Addr::from(u32::from(net.network()) + span as u32)
}

fn az_label(index: u32) -> String {
    // az-a, az-b, … wraps past 26 with a numeric suffix.
    let letter = (b'a' + (index % 26) as u8) as char;
    if index < 26 {
        format!("az-{letter}")
    } else {
        format!("az-{letter}{}", index / 26)
    }
}
