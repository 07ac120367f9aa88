//! RedbRegistry: redb-backed persistence for release history.
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Every insert and update runs inside a single write transaction, and
//! redb admits one writer at a time, so read-modify-write cycles never
//! interleave. The store supports on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};
use crate::registry::Registry;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `RegistryError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| RegistryError::$variant(e.to_string())
    };
}

type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe registry backed by redb.
#[derive(Clone)]
pub struct RedbRegistry {
    db: Arc<Database>,
}

impl RedbRegistry {
    /// Open (or create) a persistent registry at the given path.
    pub fn open(path: &Path) -> RegistryResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(map_err!(Open))?;
            }
        }
        let db = Database::create(path).map_err(map_err!(Open))?;
        let registry = Self { db: Arc::new(db) };
        registry.ensure_tables()?;
        debug!(?path, "registry opened");
        Ok(registry)
    }

    /// Create an ephemeral in-memory registry (for testing).
    pub fn open_in_memory() -> RegistryResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let registry = Self { db: Arc::new(db) };
        registry.ensure_tables()?;
        debug!("in-memory registry opened");
        Ok(registry)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> RegistryResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(RELEASES).map_err(map_err!(Table))?;
        txn.open_table(ROLLBACKS).map_err(map_err!(Table))?;
        txn.open_table(SNAPSHOTS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Bump and return the append counter inside an open write transaction.
    fn next_sequence(txn: &WriteTransaction) -> RegistryResult<u64> {
        let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
        let current = meta
            .get(SEQUENCE_KEY)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0);
        let next = current + 1;
        meta.insert(SEQUENCE_KEY, next).map_err(map_err!(Write))?;
        Ok(next)
    }

    /// Insert a record under a fresh key, assigning it the next sequence.
    fn insert_new<T: Serialize>(
        &self,
        table_def: RecordTable,
        key: &str,
        record: &mut T,
        set_sequence: impl FnOnce(&mut T, u64),
    ) -> RegistryResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let exists = txn
                .open_table(table_def)
                .map_err(map_err!(Table))?
                .get(key)
                .map_err(map_err!(Read))?
                .is_some();
            if exists {
                return Err(RegistryError::Duplicate(key.to_string()));
            }
            let sequence = Self::next_sequence(&txn)?;
            set_sequence(record, sequence);

            let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Read, mutate and write back one record in a single write transaction.
    fn modify<T, F>(&self, table_def: RecordTable, key: &str, mutate: F) -> RegistryResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> RegistryResult<()>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            let bytes = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;
            let mut record: T = serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
            mutate(&mut record)?;
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(record)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        table_def: RecordTable,
        key: &str,
    ) -> RegistryResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Every record in a table, sorted by `sequence_of`.
    fn list_json<T: DeserializeOwned>(
        &self,
        table_def: RecordTable,
        sequence_of: impl Fn(&T) -> u64,
    ) -> RegistryResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        results.sort_by_key(|r| sequence_of(r));
        Ok(results)
    }
}

impl Registry for RedbRegistry {
    // ── Deployments ────────────────────────────────────────────────

    fn add_deployment(&self, record: &DeploymentRecord) -> RegistryResult<DeploymentRecord> {
        let mut stored = record.clone();
        stored.revision = 0;
        self.insert_new(DEPLOYMENTS, &record.id, &mut stored, |r, seq| r.sequence = seq)?;
        debug!(
            deployment_id = %stored.id,
            environment = %stored.environment,
            status = %stored.status,
            "deployment recorded"
        );
        Ok(stored)
    }

    fn mark_deployment_rolled_back(&self, id: &str) -> RegistryResult<DeploymentRecord> {
        let record = self.modify(DEPLOYMENTS, id, |record: &mut DeploymentRecord| {
            match record.status {
                DeploymentStatus::Success | DeploymentStatus::Failed => {
                    record.status = DeploymentStatus::RolledBack;
                    record.rollback_available = false;
                    record.revision += 1;
                    Ok(())
                }
                other => Err(RegistryError::InvalidTransition {
                    id: record.id.clone(),
                    from: other.to_string(),
                    to: DeploymentStatus::RolledBack.to_string(),
                }),
            }
        })?;
        debug!(deployment_id = %id, "deployment marked rolled back");
        Ok(record)
    }

    fn get_deployment(&self, id: &str) -> RegistryResult<Option<DeploymentRecord>> {
        self.get_json(DEPLOYMENTS, id)
    }

    fn list_deployments(&self) -> RegistryResult<Vec<DeploymentRecord>> {
        self.list_json(DEPLOYMENTS, |r: &DeploymentRecord| r.sequence)
    }

    // ── Releases ───────────────────────────────────────────────────

    fn add_release(&self, record: &ReleaseRecord) -> RegistryResult<ReleaseRecord> {
        let mut stored = record.clone();
        stored.revision = 0;
        self.insert_new(RELEASES, &record.release_id, &mut stored, |r, seq| {
            r.sequence = seq
        })?;
        debug!(release_id = %stored.release_id, status = %stored.status, "release recorded");
        Ok(stored)
    }

    fn update_release(&self, id: &str, update: &ReleaseUpdate) -> RegistryResult<ReleaseRecord> {
        let record = self.modify(RELEASES, id, |record: &mut ReleaseRecord| {
            if let Some(expected) = update.expected_revision {
                if expected != record.revision {
                    return Err(RegistryError::Conflict {
                        id: id.to_string(),
                        expected,
                        actual: record.revision,
                    });
                }
            }
            update.apply(record)
        })?;
        debug!(release_id = %id, status = %record.status, revision = record.revision, "release updated");
        Ok(record)
    }

    fn get_release(&self, id: &str) -> RegistryResult<Option<ReleaseRecord>> {
        self.get_json(RELEASES, id)
    }

    fn list_releases(&self) -> RegistryResult<Vec<ReleaseRecord>> {
        self.list_json(RELEASES, |r: &ReleaseRecord| r.sequence)
    }

    // ── Rollbacks ──────────────────────────────────────────────────

    fn add_rollback(&self, entry: &RollbackEntry) -> RegistryResult<RollbackEntry> {
        let mut stored = entry.clone();
        self.insert_new(ROLLBACKS, &entry.rollback_id, &mut stored, |r, seq| {
            r.sequence = seq
        })?;
        debug!(rollback_id = %stored.rollback_id, success = stored.success, "rollback recorded");
        Ok(stored)
    }

    fn get_rollback(&self, id: &str) -> RegistryResult<Option<RollbackEntry>> {
        self.get_json(ROLLBACKS, id)
    }

    fn list_rollbacks(&self) -> RegistryResult<Vec<RollbackEntry>> {
        self.list_json(ROLLBACKS, |r: &RollbackEntry| r.sequence)
    }

    fn put_snapshot(&self, snapshot: &RollbackSnapshot) -> RegistryResult<()> {
        let mut stored = snapshot.clone();
        // Snapshots are keyed by rollback id and do not take part in ordering.
        self.insert_new(SNAPSHOTS, &snapshot.rollback_id, &mut stored, |_, _| {})?;
        debug!(rollback_id = %snapshot.rollback_id, artifacts = snapshot.artifacts.len(), "snapshot stored");
        Ok(())
    }

    fn get_snapshot(&self, rollback_id: &str) -> RegistryResult<Option<RollbackSnapshot>> {
        self.get_json(SNAPSHOTS, rollback_id)
    }
}
