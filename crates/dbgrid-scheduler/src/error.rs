//! Scheduler error types.

use thiserror::Error;

use dbgrid_placement::UnknownPolicy;
use dbgrid_state::{StateError, WorkloadId};

/// Errors that can occur while binding a workload to a host.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no compute host can fit {requested_mb} MB under the memory ceiling")]
    OutOfCapacity { requested_mb: u64 },

    #[error("pinned host {host} is not up")]
    HostUnavailable { host: String },

    #[error("workload not found: {0}")]
    WorkloadNotFound(WorkloadId),

    #[error("workload {workload_id} already bound to {host}")]
    AlreadyScheduled { workload_id: WorkloadId, host: String },

    #[error("scheduler configuration: {0}")]
    Config(#[from] UnknownPolicy),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl SchedulerError {
    /// Whether the failure means nothing was bound and nothing was provisioned.
    pub fn is_placement_failure(&self) -> bool {
        matches!(
            self,
            SchedulerError::OutOfCapacity { .. } | SchedulerError::HostUnavailable { .. }
        )
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
