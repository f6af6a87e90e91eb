//! StateStore: redb-backed persistence for dbgrid.
//!
//! Typed operations over workloads, guest status rows, volumes and host
//! service records. Values are JSON-serialized into redb's `&[u8]` value
//! columns. Multi-row invariants (workload + guest status creation, the
//! host-binding compare-and-swap) are enforced inside a single write
//! transaction; redb serializes writers, so these are atomic against
//! concurrent callers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type IdTable = TableDefinition<'static, u64, &'static [u8]>;
type NameTable = TableDefinition<'static, &'static str, &'static [u8]>;

fn encode<T: Serialize>(record: &'static str, value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StateError::Codec {
        record,
        reason: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(record: &'static str, bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Codec {
        record,
        reason: e.to_string(),
    })
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

    /// Create an ephemeral in-memory state store (for testing).
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

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        txn.open_table(GUEST_STATUS).map_err(map_err!(Table))?;
        txn.open_table(VOLUMES).map_err(map_err!(Table))?;
        txn.open_table(HOSTS).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic row helpers ────────────────────────────────────────

    fn get_by_id<T: DeserializeOwned>(
        &self,
        def: IdTable,
        record: &'static str,
        id: u64,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Storage))? {
            Some(guard) => Ok(Some(decode(record, guard.value())?)),
            None => Ok(None),
        }
    }

    fn put_by_id<T: Serialize>(
        &self,
        def: IdTable,
        record: &'static str,
        id: u64,
        value: &T,
    ) -> StateResult<()> {
        let bytes = encode(record, value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(id, bytes.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Read-modify-write one row inside a single write transaction.
    ///
    /// If `f` fails the transaction is dropped uncommitted.
    fn update_by_id<T, F>(&self, def: IdTable, record: &'static str, id: u64, f: F) -> StateResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> StateResult<()>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let value = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let current: Option<T> = match table.get(id).map_err(map_err!(Storage))? {
                Some(guard) => Some(decode(record, guard.value())?),
                None => None,
            };
            let mut value = current.ok_or_else(|| StateError::not_found(record, id))?;
            f(&mut value)?;
            let bytes = encode(record, &value)?;
            table
                .insert(id, bytes.as_slice())
                .map_err(map_err!(Storage))?;
            value
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(value)
    }

    fn scan_ids<T: DeserializeOwned>(&self, def: IdTable, record: &'static str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (_, value) = entry.map_err(map_err!(Storage))?;
            results.push(decode(record, value.value())?);
        }
        Ok(results)
    }

    fn get_by_name<T: DeserializeOwned>(
        &self,
        def: NameTable,
        record: &'static str,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Storage))? {
            Some(guard) => Ok(Some(decode(record, guard.value())?)),
            None => Ok(None),
        }
    }

    fn put_by_name<T: Serialize>(
        &self,
        def: NameTable,
        record: &'static str,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let bytes = encode(record, value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn delete_by_name(&self, def: NameTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Storage))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    fn scan_names<T: DeserializeOwned>(&self, def: NameTable, record: &'static str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (_, value) = entry.map_err(map_err!(Storage))?;
            results.push(decode(record, value.value())?);
        }
        Ok(results)
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Insert a new workload (no host) and its BUILDING guest status row.
    ///
    /// Both rows are written in one transaction, so a workload is never
    /// observable without its guest status.
    pub fn create_workload(&self, draft: &WorkloadDraft, now: u64) -> StateResult<Workload> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let workload = {
            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            let last = counters
                .get(WORKLOAD_ID_COUNTER)
                .map_err(map_err!(Storage))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            let id = last + 1;
            counters
                .insert(WORKLOAD_ID_COUNTER, id)
                .map_err(map_err!(Storage))?;

            let workload = Workload {
                id,
                uuid: new_uuid(),
                account: draft.account.clone(),
                name: draft.name.clone(),
                host: None,
                memory_mb: draft.memory_mb,
                vcpus: draft.vcpus,
                availability_zone: draft.availability_zone.clone(),
                volume_size_gb: draft.volume_size_gb,
                volume_id: None,
                vm_state: VmState::Building,
                power_state: PowerState::Nostate,
                created_at: now,
                updated_at: now,
                deleted: false,
                deleted_at: None,
            };

            let mut workloads = txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
            let bytes = encode("workload", &workload)?;
            workloads
                .insert(id, bytes.as_slice())
                .map_err(map_err!(Storage))?;

            let mut statuses = txn.open_table(GUEST_STATUS).map_err(map_err!(Table))?;
            let bytes = encode("guest status", &GuestStatus::building(id, now))?;
            statuses
                .insert(id, bytes.as_slice())
                .map_err(map_err!(Storage))?;

            workload
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(workload_id = workload.id, uuid = %workload.uuid, "workload created");
        Ok(workload)
    }

    /// Get a workload by id, including soft-deleted ones.
    pub fn get_workload(&self, id: WorkloadId) -> StateResult<Option<Workload>> {
        self.get_by_id(WORKLOADS, "workload", id)
    }

    /// Insert or overwrite a workload row.
    pub fn put_workload(&self, workload: &Workload) -> StateResult<()> {
        self.put_by_id(WORKLOADS, "workload", workload.id, workload)
    }

    /// Atomically mutate a workload. Fails with `NotFound` if it does not exist.
    pub fn update_workload<F>(&self, id: WorkloadId, f: F) -> StateResult<Workload>
    where
        F: FnOnce(&mut Workload) -> StateResult<()>,
    {
        self.update_by_id(WORKLOADS, "workload", id, f)
    }

    /// List all workloads, including soft-deleted ones.
    pub fn list_workloads(&self) -> StateResult<Vec<Workload>> {
        self.scan_ids(WORKLOADS, "workload")
    }

    /// Sum of `memory_mb` of non-deleted workloads, per bound host.
    pub fn committed_memory_by_host(&self) -> StateResult<HashMap<HostName, u64>> {
        let mut committed = HashMap::new();
        for w in self.list_workloads()? {
            if let (Some(host), false) = (w.host, w.deleted) {
                let slot = committed.entry(host).or_insert(0u64);
                *slot = slot.saturating_add(w.memory_mb);
            }
        }
        Ok(committed)
    }

    /// Bind a workload to `host` if it still fits under `ceiling_mb`.
    ///
    /// The ceiling check and the write happen in the same write
    /// transaction, so two concurrent binds cannot both pass against a
    /// stale committed-memory snapshot. Exact fit at the ceiling is
    /// accepted.
    pub fn bind_workload_host(
        &self,
        id: WorkloadId,
        host: &str,
        ceiling_mb: u64,
        now: u64,
    ) -> StateResult<BindOutcome> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = {
            let mut table = txn.open_table(WORKLOADS).map_err(map_err!(Table))?;

            let mut committed_mb = 0u64;
            let mut target: Option<Workload> = None;
            for entry in table.iter().map_err(map_err!(Storage))? {
                let (_, value) = entry.map_err(map_err!(Storage))?;
                let w: Workload = decode("workload", value.value())?;
                if w.id == id {
                    target = Some(w);
                } else if !w.deleted && w.host.as_deref() == Some(host) {
                    committed_mb = committed_mb.saturating_add(w.memory_mb);
                }
            }

            let mut workload = match target {
                Some(w) if !w.deleted => w,
                _ => return Err(StateError::not_found("workload", id)),
            };

            if let Some(existing) = workload.host.clone() {
                BindOutcome::AlreadyBound(existing)
            } else if committed_mb
                .checked_add(workload.memory_mb)
                .is_none_or(|total| total > ceiling_mb)
            {
                BindOutcome::OverCeiling { committed_mb }
            } else {
                workload.host = Some(host.to_string());
                workload.updated_at = now;
                let bytes = encode("workload", &workload)?;
                table
                    .insert(id, bytes.as_slice())
                    .map_err(map_err!(Storage))?;
                BindOutcome::Bound
            }
        };
        if outcome == BindOutcome::Bound {
            txn.commit().map_err(map_err!(Transaction))?;
            debug!(workload_id = id, %host, "workload bound to host");
        } else {
            txn.abort().map_err(map_err!(Transaction))?;
        }
        Ok(outcome)
    }

    // ── Guest status ───────────────────────────────────────────────

    /// Insert or overwrite a guest status row.
    pub fn put_guest_status(&self, status: &GuestStatus) -> StateResult<()> {
        self.put_by_id(GUEST_STATUS, "guest status", status.workload_id, status)
    }

    /// Get the guest status row of a workload, including soft-deleted rows.
    pub fn get_guest_status(&self, workload_id: WorkloadId) -> StateResult<Option<GuestStatus>> {
        self.get_by_id(GUEST_STATUS, "guest status", workload_id)
    }

    /// Read many guest status rows in a single transaction.
    ///
    /// Ids without a row are skipped.
    pub fn get_guest_statuses(&self, ids: &[WorkloadId]) -> StateResult<Vec<GuestStatus>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(GUEST_STATUS).map_err(map_err!(Table))?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(guard) = table.get(*id).map_err(map_err!(Storage))? {
                results.push(decode("guest status", guard.value())?);
            }
        }
        Ok(results)
    }

    /// Atomically mutate a guest status row.
    pub fn update_guest_status<F>(&self, workload_id: WorkloadId, f: F) -> StateResult<GuestStatus>
    where
        F: FnOnce(&mut GuestStatus) -> StateResult<()>,
    {
        self.update_by_id(GUEST_STATUS, "guest status", workload_id, f)
    }

    // ── Volumes ────────────────────────────────────────────────────

    /// Insert or update a volume.
    pub fn put_volume(&self, volume: &Volume) -> StateResult<()> {
        self.put_by_name(VOLUMES, "volume", &volume.id, volume)
    }

    pub fn get_volume(&self, id: &str) -> StateResult<Option<Volume>> {
        self.get_by_name(VOLUMES, "volume", id)
    }

    /// Delete a volume row. Returns true if it existed.
    pub fn delete_volume(&self, id: &str) -> StateResult<bool> {
        let existed = self.delete_by_name(VOLUMES, id)?;
        debug!(volume_id = %id, existed, "volume row deleted");
        Ok(existed)
    }

    pub fn list_volumes(&self) -> StateResult<Vec<Volume>> {
        self.scan_names(VOLUMES, "volume")
    }

    /// Volumes currently associated with a workload.
    pub fn list_volumes_for_workload(&self, workload_id: WorkloadId) -> StateResult<Vec<Volume>> {
        Ok(self
            .list_volumes()?
            .into_iter()
            .filter(|v| v.workload_id == Some(workload_id))
            .collect())
    }

    /// Unassociated, `available` volumes last updated before `cutoff`.
    pub fn list_orphan_volumes(&self, cutoff: u64) -> StateResult<Vec<Volume>> {
        Ok(self
            .list_volumes()?
            .into_iter()
            .filter(|v| {
                v.workload_id.is_none()
                    && v.status == VolumeStatus::Available
                    && v.updated_at < cutoff
            })
            .collect())
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Insert or update a host service record.
    pub fn put_host(&self, host: &HostRecord) -> StateResult<()> {
        self.put_by_name(HOSTS, "host", &host.host, host)
    }

    pub fn get_host(&self, host: &str) -> StateResult<Option<HostRecord>> {
        self.get_by_name(HOSTS, "host", host)
    }

    /// All host records in host-name order.
    pub fn list_hosts(&self) -> StateResult<Vec<HostRecord>> {
        self.scan_names(HOSTS, "host")
    }

    pub fn delete_host(&self, host: &str) -> StateResult<bool> {
        self.delete_by_name(HOSTS, host)
    }
}
