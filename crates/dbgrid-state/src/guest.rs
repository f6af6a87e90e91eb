//! Guest status store: the durable record of each workload's in-guest
//! agent lifecycle.
//!
//! Two actors write here: the guest agent (heartbeats) and the
//! orchestrator / abort procedure. Writes are last-write-wins. Reading a
//! missing or soft-deleted row is a hard `NotFound` error, since every
//! live workload has exactly one row.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::StateStore;
use crate::types::{GuestState, GuestStatus, WorkloadId};
use crate::epoch_secs;

#[derive(Clone)]
pub struct GuestStatusStore {
    state: StateStore,
}

impl GuestStatusStore {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Create (or reset) the BUILDING row for a workload.
    pub fn create(&self, workload_id: WorkloadId) -> StateResult<GuestStatus> {
        let status = GuestStatus::building(workload_id, epoch_secs());
        self.state.put_guest_status(&status)?;
        Ok(status)
    }

    /// Read the live row for a workload.
    pub fn get(&self, workload_id: WorkloadId) -> StateResult<GuestStatus> {
        match self.state.get_guest_status(workload_id)? {
            Some(status) if !status.deleted => Ok(status),
            _ => Err(StateError::not_found("guest status", workload_id)),
        }
    }

    /// Read live rows for many workloads in one pass.
    ///
    /// Ids with no live row are absent from the result.
    pub fn get_many(&self, ids: &[WorkloadId]) -> StateResult<HashMap<WorkloadId, GuestStatus>> {
        Ok(self
            .state
            .get_guest_statuses(ids)?
            .into_iter()
            .filter(|s| !s.deleted)
            .map(|s| (s.workload_id, s))
            .collect())
    }

    /// Set the state, defaulting the description to the state's canonical name.
    pub fn update(
        &self,
        workload_id: WorkloadId,
        state: GuestState,
        description: Option<&str>,
    ) -> StateResult<GuestStatus> {
        let description = description.unwrap_or(state.description()).to_string();
        let status = self.state.update_guest_status(workload_id, |row| {
            if row.deleted {
                return Err(StateError::not_found("guest status", workload_id));
            }
            row.state = state;
            row.description = description;
            row.updated_at = epoch_secs();
            Ok(())
        })?;
        debug!(workload_id, state = ?status.state, "guest status updated");
        Ok(status)
    }

    /// Update using an agent-reported status code.
    pub fn update_from_code(
        &self,
        workload_id: WorkloadId,
        code: u8,
        description: Option<&str>,
    ) -> StateResult<GuestStatus> {
        let state = GuestState::from_code(code).unwrap_or(GuestState::Unknown);
        self.update(workload_id, state, description)
    }

    /// Soft-delete the row; the state is forced to SHUTDOWN.
    pub fn soft_delete(&self, workload_id: WorkloadId) -> StateResult<GuestStatus> {
        let now = epoch_secs();
        let status = self.state.update_guest_status(workload_id, |row| {
            row.state = GuestState::Shutdown;
            row.description = GuestState::Shutdown.description().to_string();
            row.deleted = true;
            row.deleted_at = Some(now);
            row.updated_at = now;
            Ok(())
        })?;
        debug!(workload_id, "guest status soft-deleted");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkloadDraft;

    fn setup() -> (StateStore, GuestStatusStore, WorkloadId) {
        let state = StateStore::open_in_memory().unwrap();
        let workload = state
            .create_workload(
                &WorkloadDraft {
                    account: "tenant".to_string(),
                    name: "db".to_string(),
                    memory_mb: 512,
                    vcpus: 1,
                    availability_zone: None,
                    volume_size_gb: None,
                },
                1000,
            )
            .unwrap();
        (state.clone(), GuestStatusStore::new(state), workload.id)
    }

    #[test]
    fn new_workload_reads_building() {
        let (_, guests, id) = setup();
        assert_eq!(guests.get(id).unwrap().state, GuestState::Building);
    }

    #[test]
    fn missing_row_is_not_found() {
        let (_, guests, _) = setup();
        assert!(guests.get(999).unwrap_err().is_not_found());
        assert!(guests.update(999, GuestState::Running, None).unwrap_err().is_not_found());
    }

    #[test]
    fn update_defaults_description() {
        let (_, guests, id) = setup();

        let status = guests.update(id, GuestState::Running, None).unwrap();
        assert_eq!(status.description, "running");

        let status = guests.update(id, GuestState::Blocked, Some("disk full")).unwrap();
        assert_eq!(status.state, GuestState::Blocked);
        assert_eq!(status.description, "disk full");
    }

    #[test]
    fn update_from_unknown_code_is_unknown() {
        let (_, guests, id) = setup();
        let status = guests.update_from_code(id, 0x7f, None).unwrap();
        assert_eq!(status.state, GuestState::Unknown);

        let status = guests.update_from_code(id, 0x01, None).unwrap();
        assert_eq!(status.state, GuestState::Running);
    }

    #[test]
    fn soft_delete_forces_shutdown_and_hides_row() {
        let (state, guests, id) = setup();
        guests.update(id, GuestState::Running, None).unwrap();

        let status = guests.soft_delete(id).unwrap();
        assert_eq!(status.state, GuestState::Shutdown);
        assert!(status.deleted);

        assert!(guests.get(id).unwrap_err().is_not_found());
        assert!(guests.update(id, GuestState::Running, None).is_err());
        // The row is kept, never physically removed.
        assert!(state.get_guest_status(id).unwrap().unwrap().deleted);
    }

    #[test]
    fn get_many_returns_live_rows_only() {
        let (state, guests, a) = setup();
        let b = state
            .create_workload(
                &WorkloadDraft {
                    account: "tenant".to_string(),
                    name: "db2".to_string(),
                    memory_mb: 512,
                    vcpus: 1,
                    availability_zone: None,
                    volume_size_gb: None,
                },
                1000,
            )
            .unwrap()
            .id;
        guests.soft_delete(b).unwrap();

        let rows = guests.get_many(&[a, b, 77]).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows.contains_key(&a));
    }
}
