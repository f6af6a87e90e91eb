//! Control plane assembly.
//!
//! Wires one instance of every component from a [`GridConfig`] and a state
//! store. Both the long-running `standalone` mode and the one-shot
//! subcommands go through [`ControlPlane::assemble`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use dbgrid_cluster::{HostRegistry, run_heartbeat};
use dbgrid_core::GridConfig;
use dbgrid_drivers::{DriverRegistry, DriverSet};
use dbgrid_provision::{Provisioner, Timings};
use dbgrid_reaper::{OrphanReaper, ReaperWorker};
use dbgrid_scheduler::CapacityScheduler;
use dbgrid_state::StateStore;

/// Open (or create) the state store under `data_dir`.
pub fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("dbgrid.redb");
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(state)
}

pub struct ControlPlane {
    pub config: GridConfig,
    pub state: StateStore,
    pub registry: HostRegistry,
    pub drivers: DriverSet,
    pub provisioner: Arc<Provisioner>,
}

impl ControlPlane {
    pub fn assemble(config: GridConfig, state: StateStore) -> anyhow::Result<Self> {
        let registry =
            HostRegistry::new(state.clone()).with_liveness_window(config.scheduler.host_liveness());

        let drivers = DriverRegistry::build(&config.drivers, &state)?;

        let scheduler = CapacityScheduler::from_config(
            state.clone(),
            Arc::new(registry.clone()),
            &config.scheduler,
        )?;
        info!(
            policy = %config.scheduler.policy,
            memory_ceiling_mb = config.scheduler.memory_ceiling_mb,
            "scheduler initialized"
        );

        let provisioner = Arc::new(Provisioner::new(
            state.clone(),
            Arc::new(scheduler),
            drivers.clone(),
            Timings::from(&config.provisioning),
        ));

        Ok(Self {
            config,
            state,
            registry,
            drivers,
            provisioner,
        })
    }

    pub fn reaper(&self) -> ReaperWorker {
        let reaper = OrphanReaper::from_config(
            self.state.clone(),
            self.drivers.volumes.clone(),
            &self.config.reaper,
        );
        ReaperWorker::new(reaper, self.config.reaper.interval())
    }

    /// Heartbeat period for the local host: a third of the liveness
    /// window, at least one second.
    pub fn heartbeat_interval(&self) -> Duration {
        (self.config.scheduler.host_liveness() / 3).max(Duration::from_secs(1))
    }

    /// Register `host` and run its heartbeat and the reaper until
    /// `shutdown` flips to `true`.
    pub async fn run(self, host: String, zone: String, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        self.registry.register(&host, &zone)?;

        let heartbeat = tokio::spawn(run_heartbeat(
            self.registry.clone(),
            host,
            self.heartbeat_interval(),
            shutdown.clone(),
        ));

        let reaper = self.reaper();
        let reaper_handle = tokio::spawn(async move {
            reaper.run(shutdown).await;
        });

        let _ = heartbeat.await;
        let _ = reaper_handle.await;
        Ok(())
    }
}
