//! gantry-core — shared domain types and configuration.
//!
//! Everything downstream (topology, state, rollout, pipeline) speaks
//! in terms of these types: the blue/green target colors, image
//! references, the traffic-shift schedule, and the `gantry.toml`
//! deployment configuration.

pub mod config;
pub mod types;

pub use config::GantryConfig;
pub use types::*;
