//! Provisioning error types.

use std::time::Duration;

use thiserror::Error;

use dbgrid_drivers::DriverError;
use dbgrid_scheduler::SchedulerError;
use dbgrid_state::{GuestState, StateError, VmState, WorkloadId};

use crate::orchestrator::ProvisionStage;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("out of capacity: no host can fit {requested_mb} MB")]
    OutOfCapacity { requested_mb: u64 },

    #[error("pinned host {host} is not up")]
    HostUnavailable { host: String },

    /// A bounded wait in `stage` expired; the workload was aborted.
    #[error("{stage} timed out after {elapsed:?}")]
    Timeout {
        stage: ProvisionStage,
        elapsed: Duration,
    },

    /// The instance could not be confirmed stopped during abort.
    #[error("workload {workload_id} did not quiesce within {elapsed:?}; manual intervention required")]
    QuiesceTimeout {
        workload_id: WorkloadId,
        elapsed: Duration,
    },

    #[error("workload not found: {0}")]
    NotFound(WorkloadId),

    /// Only a freshly created workload can be provisioned; FAILED is final.
    #[error("workload {workload_id} is not awaiting provisioning (vm_state {vm_state:?}, guest {guest_state})")]
    NotBuilding {
        workload_id: WorkloadId,
        vm_state: VmState,
        guest_state: GuestState,
    },

    /// Another provisioning run already bound the workload.
    #[error("workload {workload_id} already scheduled on {host}")]
    AlreadyScheduled { workload_id: WorkloadId, host: String },

    #[error("scheduler error: {0}")]
    Scheduler(SchedulerError),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl ProvisionError {
    /// Errors that leave the workload's records untouched.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ProvisionError::NotFound(_)
                | ProvisionError::NotBuilding { .. }
                | ProvisionError::AlreadyScheduled { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ProvisionError::Timeout { .. } | ProvisionError::QuiesceTimeout { .. }
        )
    }
}

impl From<SchedulerError> for ProvisionError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::OutOfCapacity { requested_mb } => {
                ProvisionError::OutOfCapacity { requested_mb }
            }
            SchedulerError::HostUnavailable { host } => ProvisionError::HostUnavailable { host },
            SchedulerError::WorkloadNotFound(id) => ProvisionError::NotFound(id),
            SchedulerError::AlreadyScheduled { workload_id, host } => {
                ProvisionError::AlreadyScheduled { workload_id, host }
            }
            SchedulerError::State(e) => ProvisionError::State(e),
            other => ProvisionError::Scheduler(other),
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
