//! Provisioning orchestrator.
//!
//! Stages run strictly in sequence for one workload. Different workloads
//! are independent and may be provisioned concurrently; they only meet at
//! the scheduler's host binding.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use dbgrid_core::{PollError, poll_until};
use dbgrid_drivers::{DatabaseSpecs, DriverError, DriverSet};
use dbgrid_scheduler::{CapacityScheduler, RequestContext};
use dbgrid_state::*;

use crate::abort::AbortProcedure;
use crate::error::{ProvisionError, ProvisionResult};
use crate::timings::Timings;

/// Where a workload is in its provisioning lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisionStage {
    /// Waiting for the requested data volume to become available.
    VolumeCreating,
    Scheduling,
    Booting,
    GuestInitializing,
    Running,
    Aborting,
    Failed,
}

impl ProvisionStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProvisionStage::Running | ProvisionStage::Failed)
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisionStage::VolumeCreating => "VOLUME_CREATING",
            ProvisionStage::Scheduling => "SCHEDULING",
            ProvisionStage::Booting => "BOOTING",
            ProvisionStage::GuestInitializing => "GUEST_INITIALIZING",
            ProvisionStage::Running => "RUNNING",
            ProvisionStage::Aborting => "ABORTING",
            ProvisionStage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Creates, provisions, and deletes workloads.
pub struct Provisioner {
    state: StateStore,
    guests: GuestStatusStore,
    scheduler: Arc<CapacityScheduler>,
    drivers: DriverSet,
    abort: AbortProcedure,
    timings: Timings,
}

impl Provisioner {
    pub fn new(
        state: StateStore,
        scheduler: Arc<CapacityScheduler>,
        drivers: DriverSet,
        timings: Timings,
    ) -> Self {
        Self {
            guests: GuestStatusStore::new(state.clone()),
            abort: AbortProcedure::new(state.clone(), drivers.compute.clone(), timings),
            state,
            scheduler,
            drivers,
            timings,
        }
    }

    pub fn guests(&self) -> &GuestStatusStore {
        &self.guests
    }

    /// Record a new workload and its BUILDING guest row, then create and
    /// wait for its data volume if one was requested.
    ///
    /// A volume that does not become available in time fails the
    /// workload. The volume stays referenced by the workload so delete
    /// can still find it.
    pub async fn create_workload(&self, draft: &WorkloadDraft) -> ProvisionResult<Workload> {
        let mut workload = self.state.create_workload(draft, epoch_secs())?;
        info!(
            workload_id = workload.id,
            uuid = %workload.uuid,
            account = %workload.account,
            memory_mb = workload.memory_mb,
            "workload created"
        );

        let Some(size_gb) = draft.volume_size_gb else {
            return Ok(workload);
        };

        let volume_id = match self.drivers.volumes.create(size_gb, &draft.name).await {
            Ok(id) => id,
            Err(e) => {
                self.mark_failed(workload.id, ProvisionStage::VolumeCreating, "volume create failed")?;
                return Err(e.into());
            }
        };
        workload = self.state.update_workload(workload.id, |w| {
            w.volume_id = Some(volume_id.clone());
            w.updated_at = epoch_secs();
            Ok(())
        })?;
        debug!(workload_id = workload.id, %volume_id, size_gb, "waiting for volume");

        let volumes = &self.drivers.volumes;
        let vid = volume_id.as_str();
        let waited = poll_until(
            move || async move { Ok::<_, ProvisionError>(volumes.get(vid).await?) },
            |v: &Volume| match v.status {
                VolumeStatus::Available => Ok(true),
                VolumeStatus::Error => Err(ProvisionError::Driver(DriverError::Volume {
                    volume_id: v.id.clone(),
                    reason: "volume entered error state".to_string(),
                })),
                _ => Ok(false),
            },
            self.timings.volume_poll_interval,
            Some(self.timings.volume_timeout),
        )
        .await;

        match waited {
            Ok(_) => {
                info!(workload_id = workload.id, %volume_id, "volume available");
                Ok(workload)
            }
            Err(PollError::Timeout { elapsed }) => {
                warn!(workload_id = workload.id, %volume_id, ?elapsed, "volume not available in time");
                self.mark_failed(workload.id, ProvisionStage::VolumeCreating, "volume create timed out")?;
                Err(ProvisionError::Timeout {
                    stage: ProvisionStage::VolumeCreating,
                    elapsed,
                })
            }
            Err(PollError::Failed(e)) => {
                self.mark_failed(workload.id, ProvisionStage::VolumeCreating, "volume create failed")?;
                Err(e)
            }
        }
    }

    /// Drive a created workload to RUNNING and return its host.
    ///
    /// Only a workload still BUILDING with no host is accepted; anything
    /// else is rejected without touching its records. On any later failure
    /// the guest status ends FAILED. Boot and guest initialization failures
    /// run abort/recovery first; if the instance then fails to quiesce,
    /// that error replaces the original one.
    pub async fn provision(
        &self,
        ctx: &RequestContext,
        workload_id: WorkloadId,
        specs: &DatabaseSpecs,
    ) -> ProvisionResult<HostName> {
        self.ensure_building(workload_id)?;

        // ── Scheduling ──
        enter(workload_id, ProvisionStage::Scheduling);
        let host = match self.scheduler.schedule(ctx, workload_id) {
            Ok(host) => host,
            Err(e) => {
                let e = ProvisionError::from(e);
                // A concurrent run that won the bind owns the workload now.
                if !e.is_rejection() {
                    self.mark_failed(workload_id, ProvisionStage::Scheduling, &e.to_string())?;
                }
                return Err(e);
            }
        };

        // ── Booting ──
        enter(workload_id, ProvisionStage::Booting);
        let workload = self
            .state
            .get_workload(workload_id)?
            .ok_or(ProvisionError::NotFound(workload_id))?;
        if let Err(e) = self.drivers.compute.boot(&workload).await {
            return Err(self.abort_with(workload_id, ProvisionStage::Booting, e.into()).await);
        }
        let booted = self.state.update_workload(workload_id, |w| {
            w.power_state = PowerState::Running;
            w.updated_at = epoch_secs();
            Ok(())
        });
        if let Err(e) = booted {
            return Err(self.abort_with(workload_id, ProvisionStage::Booting, e.into()).await);
        }

        if let Some(volume_id) = &workload.volume_id {
            if let Err(e) = self.drivers.volumes.attach(volume_id, workload_id).await {
                return Err(self.abort_with(workload_id, ProvisionStage::Booting, e.into()).await);
            }
            debug!(workload_id, %volume_id, "volume attached");
        }

        // ── Guest initialization ──
        enter(workload_id, ProvisionStage::GuestInitializing);
        if let Err(e) = self.drivers.guest_agent.send_prepare(workload_id, specs).await {
            return Err(self
                .abort_with(workload_id, ProvisionStage::GuestInitializing, e.into())
                .await);
        }

        let guests = &self.guests;
        let ready = poll_until(
            move || async move { guests.get(workload_id) },
            |g: &GuestStatus| Ok(g.state == GuestState::Running),
            self.timings.guest_poll_interval,
            Some(self.timings.guest_init_timeout),
        )
        .await;

        match ready {
            Ok(_) => {}
            Err(PollError::Timeout { elapsed }) => {
                let cause = ProvisionError::Timeout {
                    stage: ProvisionStage::GuestInitializing,
                    elapsed,
                };
                return Err(self
                    .abort_with(workload_id, ProvisionStage::GuestInitializing, cause)
                    .await);
            }
            Err(PollError::Failed(e)) => {
                return Err(self
                    .abort_with(workload_id, ProvisionStage::GuestInitializing, e.into())
                    .await);
            }
        }

        // ── Running ──
        self.state.update_workload(workload_id, |w| {
            w.vm_state = VmState::Active;
            w.updated_at = epoch_secs();
            Ok(())
        })?;
        info!(workload_id, %host, stage = %ProvisionStage::Running, "workload running");
        Ok(host)
    }

    /// Create then provision in one call.
    pub async fn launch(
        &self,
        ctx: &RequestContext,
        draft: &WorkloadDraft,
        specs: &DatabaseSpecs,
    ) -> ProvisionResult<(Workload, HostName)> {
        let workload = self.create_workload(draft).await?;
        let host = self.provision(ctx, workload.id, specs).await?;
        Ok((workload, host))
    }

    /// Delete a workload in any state, including FAILED.
    ///
    /// Destroys the compute instance if one was bound, deletes every
    /// volume associated with or referenced by the workload, then
    /// soft-deletes the guest status and the workload. Deleting an
    /// already-deleted workload is a no-op.
    pub async fn delete_workload(&self, workload_id: WorkloadId) -> ProvisionResult<()> {
        let workload = self
            .state
            .get_workload(workload_id)?
            .ok_or(ProvisionError::NotFound(workload_id))?;
        if workload.deleted {
            debug!(workload_id, "workload already deleted");
            return Ok(());
        }

        if let Some(host) = &workload.host {
            match self.drivers.compute.destroy(workload_id).await {
                Ok(()) => info!(workload_id, %host, "compute instance destroyed"),
                Err(e) if e.is_missing() => debug!(workload_id, %host, "no compute instance to destroy"),
                Err(e) => return Err(e.into()),
            }
        }

        let mut volume_ids: Vec<VolumeId> = self
            .state
            .list_volumes_for_workload(workload_id)?
            .into_iter()
            .map(|v| v.id)
            .collect();
        if let Some(id) = &workload.volume_id {
            if !volume_ids.contains(id) {
                volume_ids.push(id.clone());
            }
        }
        for volume_id in &volume_ids {
            match self.drivers.volumes.delete(volume_id).await {
                Ok(()) => info!(workload_id, %volume_id, "volume deleted"),
                Err(e) if e.is_missing() => debug!(workload_id, %volume_id, "volume already gone"),
                Err(e) => return Err(e.into()),
            }
        }

        match self.guests.soft_delete(workload_id) {
            Ok(_) => {}
            Err(e) if e.is_not_found() => warn!(workload_id, "workload had no guest status row"),
            Err(e) => return Err(e.into()),
        }

        let now = epoch_secs();
        self.state.update_workload(workload_id, |w| {
            w.deleted = true;
            w.deleted_at = Some(now);
            w.vm_state = VmState::Deleted;
            w.updated_at = now;
            Ok(())
        })?;
        info!(workload_id, volumes = volume_ids.len(), "workload deleted");
        Ok(())
    }

    fn ensure_building(&self, workload_id: WorkloadId) -> ProvisionResult<()> {
        let workload = self
            .state
            .get_workload(workload_id)?
            .filter(|w| !w.deleted)
            .ok_or(ProvisionError::NotFound(workload_id))?;
        let guest = self.guests.get(workload_id)?;

        if workload.vm_state != VmState::Building || guest.state != GuestState::Building {
            warn!(
                workload_id,
                vm_state = ?workload.vm_state,
                guest_state = %guest.state,
                "refusing to provision workload that is not building"
            );
            return Err(ProvisionError::NotBuilding {
                workload_id,
                vm_state: workload.vm_state,
                guest_state: guest.state,
            });
        }
        if let Some(host) = workload.host {
            debug!(workload_id, %host, "workload already scheduled");
            return Err(ProvisionError::AlreadyScheduled { workload_id, host });
        }
        Ok(())
    }

    /// Fail without abort: nothing was provisioned yet.
    fn mark_failed(&self, workload_id: WorkloadId, stage: ProvisionStage, reason: &str) -> ProvisionResult<()> {
        warn!(workload_id, %stage, %reason, "provisioning failed");
        self.guests
            .update(workload_id, GuestState::Failed, Some(reason))?;
        self.state.update_workload(workload_id, |w| {
            w.vm_state = VmState::Error;
            w.updated_at = epoch_secs();
            Ok(())
        })?;
        Ok(())
    }

    /// Run abort/recovery for a failure in `stage` and pick the error to
    /// surface.
    async fn abort_with(
        &self,
        workload_id: WorkloadId,
        stage: ProvisionStage,
        cause: ProvisionError,
    ) -> ProvisionError {
        enter(workload_id, ProvisionStage::Aborting);
        let reason = format!("{stage} failed: {cause}");
        match self.abort.run(workload_id, &reason).await {
            Ok(_) => {
                warn!(workload_id, %stage, error = %cause, "workload aborted; guest pinned FAILED");
                cause
            }
            Err(quiesce @ ProvisionError::QuiesceTimeout { .. }) => quiesce,
            Err(abort_err) => {
                error!(
                    alert = true,
                    workload_id,
                    %stage,
                    error = %abort_err,
                    cause = %cause,
                    "abort/recovery failed"
                );
                cause
            }
        }
    }
}

fn enter(workload_id: WorkloadId, stage: ProvisionStage) {
    info!(workload_id, %stage, "entering stage");
}
