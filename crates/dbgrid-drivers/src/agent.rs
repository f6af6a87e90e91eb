//! In-guest agent channel.
//!
//! `send_prepare` is fire-and-forget: the agent reports progress later by
//! writing to the [`GuestStatusStore`], never through the return value.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use dbgrid_state::{GuestState, GuestStatusStore, WorkloadId};

use crate::error::{DriverError, DriverResult};

/// Databases and users the agent should create on first start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSpecs {
    pub databases: Vec<String>,
    pub users: Vec<String>,
}

#[async_trait]
pub trait GuestAgent: Send + Sync {
    /// Deliver the prepare message. Returns once the message is queued.
    async fn send_prepare(&self, workload_id: WorkloadId, specs: &DatabaseSpecs) -> DriverResult<()>;
}

/// How [`FakeGuestAgent`] reacts to a prepare message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentBehavior {
    /// Report RUNNING once after `after`.
    ReportRunning { after: Duration },
    /// Never report anything.
    Silent,
    /// After `delay`, report RUNNING `count` times, `every` apart,
    /// regardless of what anyone else wrote in between.
    Heartbeat {
        delay: Duration,
        every: Duration,
        count: u32,
    },
    /// Refuse the message.
    Unreachable,
}

/// Simulated agent that writes to the guest status store from a task.
pub struct FakeGuestAgent {
    guests: GuestStatusStore,
    behavior: AgentBehavior,
}

impl FakeGuestAgent {
    pub fn new(guests: GuestStatusStore, behavior: AgentBehavior) -> Self {
        Self { guests, behavior }
    }

    fn report_running(guests: &GuestStatusStore, workload_id: WorkloadId) {
        // The row may already be soft-deleted; a late agent is not an error.
        if let Err(e) = guests.update(workload_id, GuestState::Running, None) {
            debug!(workload_id, error = %e, "[FAKE] agent heartbeat dropped");
        }
    }
}

#[async_trait]
impl GuestAgent for FakeGuestAgent {
    async fn send_prepare(&self, workload_id: WorkloadId, specs: &DatabaseSpecs) -> DriverResult<()> {
        info!(
            workload_id,
            databases = specs.databases.len(),
            users = specs.users.len(),
            behavior = ?self.behavior,
            "[FAKE] prepare sent to guest agent"
        );

        let guests = self.guests.clone();
        match self.behavior {
            AgentBehavior::ReportRunning { after } => {
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    Self::report_running(&guests, workload_id);
                });
            }
            AgentBehavior::Heartbeat {
                delay,
                every,
                count,
            } => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for i in 0..count {
                        if i > 0 {
                            tokio::time::sleep(every).await;
                        }
                        Self::report_running(&guests, workload_id);
                    }
                });
            }
            AgentBehavior::Silent => {}
            AgentBehavior::Unreachable => {
                return Err(DriverError::Agent {
                    workload_id,
                    reason: "simulated message bus failure".to_string(),
                });
            }
        }
        Ok(())
    }
}
