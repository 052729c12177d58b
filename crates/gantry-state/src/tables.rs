//! redb table definitions for the gantry state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). Composite keys follow the pattern
//! `{service}:{rollout_id}` or `{service}:{color}`.

use redb::TableDefinition;

/// Rollout records keyed by `{service}:{rollout_id}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollouts");

/// Steady-state service records keyed by `{service}`.
pub const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Target set membership keyed by `{service}:{color}`.
pub const TARGET_SETS: TableDefinition<&str, &[u8]> = TableDefinition::new("target_sets");
