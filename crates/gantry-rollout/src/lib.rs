//! gantry-rollout — the blue-green rollout protocol.
//!
//! The rollout is an explicit state machine
//! (`Created → Provisioning → Shifting → Monitoring → {Completed,
//! RolledBack}`, with `Failed` reachable from every non-terminal
//! state), not a callback chain into a managed service. The
//! [`controller::RolloutMachine`] owns the transitions and their
//! guards; the [`driver::RolloutDriver`] executes them against a
//! [`driver::ClusterBackend`], persisting every status change.
//!
//! The listener's default-target weights are the single piece of
//! shared mutable state between steady-state serving and a rollout.
//! Only the driver mutates them, and only through the schedule's
//! declared steps: canary split, full promote, full revert.

pub mod controller;
pub mod driver;
pub mod memory;

pub use controller::{RolloutAction, RolloutEvent, RolloutMachine, RolloutPhase, TransitionError};
pub use driver::{
    BackendError, ClusterBackend, RolloutDriver, RolloutError, RolloutOutcome, RolloutRequest,
    TrafficSplit,
};
pub use memory::{MemoryCluster, StaticProber};
