//! Driver selection from the `[drivers]` config section.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use dbgrid_core::DriversConfig;
use dbgrid_state::{GuestStatusStore, StateStore};

use crate::agent::{AgentBehavior, FakeGuestAgent, GuestAgent};
use crate::compute::{ComputeDriver, FakeCompute};
use crate::error::{DriverError, DriverResult};
use crate::volume::{FakeVolumes, VolumeDriver};

/// Delay before the simulated agent reports RUNNING.
const FAKE_AGENT_STARTUP: Duration = Duration::from_millis(500);

/// Backends known to this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Fake,
}

impl DriverKind {
    fn parse(kind: &'static str, name: &str) -> DriverResult<Self> {
        name.parse().map_err(|_| DriverError::UnknownDriver {
            kind,
            name: name.to_string(),
        })
    }
}

impl FromStr for DriverKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fake" => Ok(DriverKind::Fake),
            _ => Err(()),
        }
    }
}

/// One instance of each collaborator, shared by the orchestrator and reaper.
#[derive(Clone)]
pub struct DriverSet {
    pub compute: Arc<dyn ComputeDriver>,
    pub volumes: Arc<dyn VolumeDriver>,
    pub guest_agent: Arc<dyn GuestAgent>,
}

pub struct DriverRegistry;

impl DriverRegistry {
    /// Instantiate the configured drivers.
    pub fn build(config: &DriversConfig, state: &StateStore) -> DriverResult<DriverSet> {
        let compute: Arc<dyn ComputeDriver> = match DriverKind::parse("compute", &config.compute)? {
            DriverKind::Fake => Arc::new(FakeCompute::new()),
        };
        let volumes: Arc<dyn VolumeDriver> = match DriverKind::parse("volume", &config.volume)? {
            DriverKind::Fake => Arc::new(FakeVolumes::new(state.clone())),
        };
        let guest_agent: Arc<dyn GuestAgent> =
            match DriverKind::parse("guest_agent", &config.guest_agent)? {
                DriverKind::Fake => Arc::new(FakeGuestAgent::new(
                    GuestStatusStore::new(state.clone()),
                    AgentBehavior::ReportRunning {
                        after: FAKE_AGENT_STARTUP,
                    },
                )),
            };

        info!(
            compute = %config.compute,
            volume = %config.volume,
            guest_agent = %config.guest_agent,
            "drivers loaded"
        );
        Ok(DriverSet {
            compute,
            volumes,
            guest_agent,
        })
    }
}
