//! Driver error types.

use thiserror::Error;

use dbgrid_state::{StateError, VolumeId, WorkloadId};

/// Errors raised by collaborator drivers.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("compute driver rejected workload {workload_id}: {reason}")]
    Compute { workload_id: WorkloadId, reason: String },

    /// The compute backend has no instance for this workload.
    #[error("no compute instance for workload {0}")]
    UnknownInstance(WorkloadId),

    #[error("volume {volume_id}: {reason}")]
    Volume { volume_id: VolumeId, reason: String },

    #[error("volume not found: {0}")]
    VolumeNotFound(VolumeId),

    #[error("guest agent unreachable for workload {workload_id}: {reason}")]
    Agent { workload_id: WorkloadId, reason: String },

    #[error("unknown {kind} driver {name:?}")]
    UnknownDriver { kind: &'static str, name: String },

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl DriverError {
    /// The target does not exist on the backend; deletes treat this as done.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            DriverError::UnknownInstance(_) | DriverError::VolumeNotFound(_)
        )
    }
}

pub type DriverResult<T> = Result<T, DriverError>;
