//! StateStore — redb-backed persistence for the gantry control plane.
//!
//! Typed CRUD over rollout records, service steady state, and target
//! set membership. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use gantry_core::TargetColor;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing and dry runs).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        txn.open_table(SERVICES).map_err(map_err!(Table))?;
        txn.open_table(TARGET_SETS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Rollouts ───────────────────────────────────────────────────

    /// Admit a new rollout record.
    ///
    /// The checks and the insert happen inside one write transaction: a
    /// second rollout for a service that already has a non-terminal
    /// record is rejected with `StateError::Conflict`, and a record
    /// reusing an existing id is rejected with
    /// `StateError::DuplicateRollout`. Terminal records are final and
    /// can never be overwritten through admission.
    pub fn create_rollout(&self, record: &RolloutRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let prefix = format!("{}:", record.service);

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;

            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::DuplicateRollout {
                    service: record.service.clone(),
                    rollout_id: record.id.clone(),
                });
            }

            for entry in table.iter().map_err(map_err!(Read))? {
                let (k, v) = entry.map_err(map_err!(Read))?;
                if !k.value().starts_with(&prefix) {
                    continue;
                }
                let existing: RolloutRecord =
                    serde_json::from_slice(v.value()).map_err(map_err!(Deserialize))?;
                if !existing.status.is_terminal() {
                    return Err(StateError::Conflict {
                        service: record.service.clone(),
                        rollout_id: existing.id,
                    });
                }
            }

            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "rollout admitted");
        Ok(())
    }

    /// Overwrite an existing rollout record (status/phase updates).
    pub fn put_rollout(&self, record: &RolloutRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a rollout by service and id.
    pub fn get_rollout(&self, service: &str, rollout_id: &str) -> StateResult<Option<RolloutRecord>> {
        let key = rollout_key(service, rollout_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: RolloutRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all rollout records for a service.
    pub fn list_rollouts(&self, service: &str) -> StateResult<Vec<RolloutRecord>> {
        let prefix = format!("{service}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (k, v) = entry.map_err(map_err!(Read))?;
            if !k.value().starts_with(&prefix) {
                continue;
            }
            let record: RolloutRecord =
                serde_json::from_slice(v.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// The non-terminal rollout for a service, if one exists.
    pub fn active_rollout(&self, service: &str) -> StateResult<Option<RolloutRecord>> {
        Ok(self
            .list_rollouts(service)?
            .into_iter()
            .find(|r| !r.status.is_terminal()))
    }

    // ── Services ───────────────────────────────────────────────────

    /// Insert or update a service's steady state.
    pub fn put_service(&self, state: &ServiceState) -> StateResult<()> {
        let value = serde_json::to_vec(state).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
            table
                .insert(state.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(service = %state.name, live = %state.live_target, "service state stored");
        Ok(())
    }

    /// Get a service's steady state by name.
    pub fn get_service(&self, name: &str) -> StateResult<Option<ServiceState>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SERVICES).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let state: ServiceState =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    // ── Target sets ────────────────────────────────────────────────

    /// Insert or update one target set's membership.
    pub fn put_target_set(&self, state: &TargetSetState) -> StateResult<()> {
        let key = state.table_key();
        let value = serde_json::to_vec(state).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TARGET_SETS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get one target set's membership.
    pub fn get_target_set(
        &self,
        service: &str,
        color: TargetColor,
    ) -> StateResult<Option<TargetSetState>> {
        let key = target_set_key(service, color);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TARGET_SETS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let state: TargetSetState =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }
}
