//! Compute driver interface and simulated implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use dbgrid_state::{PowerState, Workload, WorkloadId};

use crate::error::{DriverError, DriverResult};

/// Compute lifecycle operations on a workload's virtual machine.
#[async_trait]
pub trait ComputeDriver: Send + Sync {
    /// Start the boot sequence. Success means booting started, not that
    /// the guest is up.
    async fn boot(&self, workload: &Workload) -> DriverResult<()>;

    async fn get_power_state(&self, workload_id: WorkloadId) -> DriverResult<PowerState>;

    /// Request suspension. Completion is observed through
    /// [`get_power_state`](Self::get_power_state).
    async fn suspend(&self, workload_id: WorkloadId) -> DriverResult<()>;

    /// Tear the instance down. Unknown instances yield
    /// [`DriverError::UnknownInstance`].
    async fn destroy(&self, workload_id: WorkloadId) -> DriverResult<()>;
}

/// Knobs for [`FakeCompute`].
#[derive(Debug, Clone)]
pub struct FakeComputeBehavior {
    pub fail_boot: bool,
    /// State reached after `suspend`; `None` means the instance never
    /// quiesces.
    pub suspend_to: Option<PowerState>,
    /// Power-state reads that still report RUNNING after `suspend`.
    pub quiesce_after_polls: u32,
}

impl Default for FakeComputeBehavior {
    fn default() -> Self {
        Self {
            fail_boot: false,
            suspend_to: Some(PowerState::Suspended),
            quiesce_after_polls: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FakeInstance {
    power: PowerState,
    /// Reads left before a pending suspend lands.
    suspend_pending: Option<u32>,
}

/// In-process compute backend.
pub struct FakeCompute {
    behavior: FakeComputeBehavior,
    instances: Mutex<HashMap<WorkloadId, FakeInstance>>,
    suspend_calls: AtomicU32,
}

impl FakeCompute {
    pub fn new() -> Self {
        Self::with_behavior(FakeComputeBehavior::default())
    }

    pub fn with_behavior(behavior: FakeComputeBehavior) -> Self {
        Self {
            behavior,
            instances: Mutex::new(HashMap::new()),
            suspend_calls: AtomicU32::new(0),
        }
    }

    /// Boot always fails.
    pub fn failing() -> Self {
        Self::with_behavior(FakeComputeBehavior {
            fail_boot: true,
            ..FakeComputeBehavior::default()
        })
    }

    /// Suspend is accepted but the instance keeps running.
    pub fn stuck() -> Self {
        Self::with_behavior(FakeComputeBehavior {
            suspend_to: None,
            ..FakeComputeBehavior::default()
        })
    }

    pub fn suspend_calls(&self) -> u32 {
        self.suspend_calls.load(Ordering::SeqCst)
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.lock().await.len()
    }

    /// Force the power state of an instance, creating it if needed.
    pub async fn set_power_state(&self, workload_id: WorkloadId, power: PowerState) {
        self.instances.lock().await.insert(
            workload_id,
            FakeInstance {
                power,
                suspend_pending: None,
            },
        );
    }
}

impl Default for FakeCompute {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComputeDriver for FakeCompute {
    async fn boot(&self, workload: &Workload) -> DriverResult<()> {
        if self.behavior.fail_boot {
            return Err(DriverError::Compute {
                workload_id: workload.id,
                reason: "simulated boot failure".to_string(),
            });
        }

        info!(
            workload_id = workload.id,
            host = workload.host.as_deref().unwrap_or("-"),
            memory_mb = workload.memory_mb,
            "[FAKE] booting instance"
        );
        self.set_power_state(workload.id, PowerState::Running).await;
        Ok(())
    }

    async fn get_power_state(&self, workload_id: WorkloadId) -> DriverResult<PowerState> {
        let mut instances = self.instances.lock().await;
        let instance = instances
            .get_mut(&workload_id)
            .ok_or(DriverError::UnknownInstance(workload_id))?;

        if let Some(left) = instance.suspend_pending {
            if left == 0 {
                if let Some(target) = self.behavior.suspend_to {
                    instance.power = target;
                    instance.suspend_pending = None;
                }
            } else {
                instance.suspend_pending = Some(left - 1);
            }
        }
        Ok(instance.power)
    }

    async fn suspend(&self, workload_id: WorkloadId) -> DriverResult<()> {
        self.suspend_calls.fetch_add(1, Ordering::SeqCst);
        let mut instances = self.instances.lock().await;
        let instance = instances
            .get_mut(&workload_id)
            .ok_or(DriverError::UnknownInstance(workload_id))?;
        instance.suspend_pending = Some(self.behavior.quiesce_after_polls);
        debug!(workload_id, "[FAKE] suspend requested");
        Ok(())
    }

    async fn destroy(&self, workload_id: WorkloadId) -> DriverResult<()> {
        match self.instances.lock().await.remove(&workload_id) {
            Some(_) => {
                info!(workload_id, "[FAKE] instance destroyed");
                Ok(())
            }
            None => Err(DriverError::UnknownInstance(workload_id)),
        }
    }
}
