//! gantry-topology — the deployment topology as an explicit typed graph.
//!
//! Resources reference each other through typed values passed at
//! construction time, never looked up by name at runtime. The graph is
//! built and validated once, at configuration-load time, and resolved
//! into a dependency-ordered [`ProvisionPlan`](graph::ProvisionPlan).

pub mod compute;
pub mod edge;
pub mod error;
pub mod graph;
pub mod network;
pub mod targets;

pub use compute::{Cluster, Service, TaskDefinition};
pub use edge::{CertificateRef, DnsAlias, HostedZoneRef, Listener, LoadBalancer, SecurityPolicy};
pub use error::{TopologyError, TopologyResult};
pub use graph::{ProvisionPlan, Topology, TopologyWarning};
pub use network::{Network, Subnet, SubnetTier};
pub use targets::{HealthCheckSpec, TargetPair, TargetSet};
