//! Error types for topology construction and validation.
//!
//! All of these are configuration errors. They are fatal at load time;
//! nothing is ever provisioned from an invalid topology.

use thiserror::Error;

/// Result type alias for topology operations.
pub type TopologyResult<T> = Result<T, TopologyError>;

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("invalid CIDR block {cidr:?}: {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("subnet prefix /{prefix} does not fit inside parent /{parent_prefix}")]
    SubnetPrefixTooWide { prefix: u8, parent_prefix: u8 },

    #[error("parent CIDR {cidr} cannot hold {needed} /{prefix} subnets")]
    CidrExhausted { cidr: String, needed: u32, prefix: u8 },

    #[error("subnets {a} and {b} overlap")]
    OverlappingSubnets { a: String, b: String },

    #[error("subnet {subnet} is not contained in parent CIDR {parent}")]
    SubnetOutsideParent { subnet: String, parent: String },

    #[error("network needs at least one availability zone")]
    NoAvailabilityZones,

    #[error("load balancer {name:?} has no listeners")]
    NoListeners { name: String },

    #[error("duplicate listener port {port}")]
    DuplicateListenerPort { port: u16 },

    #[error("load balancer {name:?} requires a public subnet tier")]
    NoPublicTier { name: String },

    #[error("canary percent {percent} must be between 1 and 99")]
    InvalidCanaryPercent { percent: u32 },

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
}
