//! Orphan reaper sweeps.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use dbgrid_core::ReaperConfig;
use dbgrid_drivers::{DriverResult, VolumeDriver};
use dbgrid_state::*;

/// Counters from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReapStats {
    pub volumes_deleted: u32,
    pub volume_failures: u32,
    pub builds_failed: u32,
    pub build_failures: u32,
}

impl ReapStats {
    pub fn is_empty(&self) -> bool {
        *self == ReapStats::default()
    }
}

pub struct OrphanReaper {
    state: StateStore,
    guests: GuestStatusStore,
    volumes: Arc<dyn VolumeDriver>,
    volume_expiration: Duration,
    build_timeout: Duration,
}

impl OrphanReaper {
    pub fn new(
        state: StateStore,
        volumes: Arc<dyn VolumeDriver>,
        volume_expiration: Duration,
        build_timeout: Duration,
    ) -> Self {
        Self {
            guests: GuestStatusStore::new(state.clone()),
            state,
            volumes,
            volume_expiration,
            build_timeout,
        }
    }

    pub fn from_config(state: StateStore, volumes: Arc<dyn VolumeDriver>, config: &ReaperConfig) -> Self {
        Self::new(
            state,
            volumes,
            Duration::from_secs(config.volume_expiration_secs),
            Duration::from_secs(config.build_timeout_secs),
        )
    }

    /// Run both sweeps as of `now` (unix seconds).
    pub async fn run_once(&self, now: u64) -> ReapStats {
        let mut stats = ReapStats::default();

        match self.reap_orphaned_volumes(now).await {
            Ok((deleted, failed)) => {
                stats.volumes_deleted = deleted;
                stats.volume_failures = failed;
            }
            Err(e) => error!(error = %e, "failed to list orphaned volumes"),
        }

        match self.reap_stuck_builds(now) {
            Ok((failed, errors)) => {
                stats.builds_failed = failed;
                stats.build_failures = errors;
            }
            Err(e) => error!(error = %e, "failed to list workloads for stuck builds"),
        }

        if !stats.is_empty() {
            info!(
                volumes_deleted = stats.volumes_deleted,
                volume_failures = stats.volume_failures,
                builds_failed = stats.builds_failed,
                build_failures = stats.build_failures,
                "reaper pass complete"
            );
        }
        stats
    }

    /// Delete unassociated, available volumes last touched before
    /// `now - volume_expiration`. Returns `(deleted, failed)`.
    pub async fn reap_orphaned_volumes(&self, now: u64) -> DriverResult<(u32, u32)> {
        let cutoff = now.saturating_sub(self.volume_expiration.as_secs());
        let orphans = self.volumes.list_orphans(cutoff).await?;

        let mut deleted = 0;
        let mut failed = 0;
        for volume in orphans {
            match self.volumes.delete(&volume.id).await {
                Ok(()) => {
                    warn!(
                        volume_id = %volume.id,
                        description = %volume.display_description,
                        age_secs = now.saturating_sub(volume.updated_at),
                        "deleted orphaned volume"
                    );
                    deleted += 1;
                }
                Err(e) => {
                    error!(volume_id = %volume.id, error = %e, "failed to delete orphaned volume");
                    failed += 1;
                }
            }
        }
        Ok((deleted, failed))
    }

    /// Force-fail workloads still building after `build_timeout`.
    /// Returns `(failed, errors)`.
    pub fn reap_stuck_builds(&self, now: u64) -> StateResult<(u32, u32)> {
        let cutoff = now.saturating_sub(self.build_timeout.as_secs());
        let stuck: Vec<Workload> = self
            .state
            .list_workloads()?
            .into_iter()
            .filter(|w| !w.deleted && w.vm_state == VmState::Building && w.created_at < cutoff)
            .collect();

        let mut failed = 0;
        let mut errors = 0;
        for workload in stuck {
            match self.fail_build(&workload, now) {
                Ok(()) => {
                    warn!(
                        workload_id = workload.id,
                        age_secs = now.saturating_sub(workload.created_at),
                        "failed workload stuck in build"
                    );
                    failed += 1;
                }
                Err(e) => {
                    error!(workload_id = workload.id, error = %e, "failed to fail stuck build");
                    errors += 1;
                }
            }
        }
        Ok((failed, errors))
    }

    fn fail_build(&self, workload: &Workload, now: u64) -> StateResult<()> {
        self.state.update_workload(workload.id, |w| {
            // Deleted or finished since the listing.
            if w.deleted || w.vm_state != VmState::Building {
                return Ok(());
            }
            w.power_state = PowerState::Failed;
            w.vm_state = VmState::Error;
            w.updated_at = now;
            Ok(())
        })?;
        match self
            .guests
            .update(workload.id, GuestState::Failed, Some("build timed out"))
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}
