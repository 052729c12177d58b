//! gantry-state — embedded state store for the gantry control plane.
//!
//! Backed by [redb](https://docs.rs/redb), persists rollout records,
//! per-service steady state, and target set membership.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value
//! columns. Composite keys (`{service}:{rollout_id}`,
//! `{service}:{color}`) enable prefix scans for related records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks. Rollout
//! admission (`create_rollout`) is atomic: at most one non-terminal
//! record can exist per service.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
