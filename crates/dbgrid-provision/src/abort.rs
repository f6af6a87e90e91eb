//! Abort/recovery: pin the guest to FAILED and quiesce the instance.
//!
//! The guest agent may still be heartbeating while the instance is being
//! stopped, so FAILED is written again on every poll iteration. Writes are
//! last-write-wins; no fencing is applied at the store.

use std::sync::Arc;

use tracing::{error, info, warn};

use dbgrid_core::{PollError, poll_until};
use dbgrid_drivers::ComputeDriver;
use dbgrid_state::*;

use crate::error::{ProvisionError, ProvisionResult};
use crate::timings::Timings;

#[derive(Clone)]
pub struct AbortProcedure {
    state: StateStore,
    guests: GuestStatusStore,
    compute: Arc<dyn ComputeDriver>,
    timings: Timings,
}

impl AbortProcedure {
    pub fn new(state: StateStore, compute: Arc<dyn ComputeDriver>, timings: Timings) -> Self {
        Self {
            guests: GuestStatusStore::new(state.clone()),
            state,
            compute,
            timings,
        }
    }

    /// Abort `workload_id` and return the quiesced power state.
    ///
    /// If the compute backend has no instance for the workload there is
    /// nothing left running and the abort completes without polling.
    pub async fn run(&self, workload_id: WorkloadId, reason: &str) -> ProvisionResult<PowerState> {
        warn!(workload_id, %reason, "aborting workload");
        self.pin_failed(workload_id, reason)?;

        match self.compute.suspend(workload_id).await {
            Ok(()) => {}
            Err(e) if e.is_missing() => {
                info!(workload_id, "no compute instance to quiesce");
                self.record_power(workload_id, PowerState::Failed)?;
                return Ok(PowerState::Failed);
            }
            Err(e) => return Err(e.into()),
        }

        let guests = &self.guests;
        let compute = &self.compute;
        let outcome = poll_until(
            move || async move {
                pin(guests, workload_id, reason)?;
                Ok::<_, ProvisionError>(compute.get_power_state(workload_id).await?)
            },
            |power: &PowerState| Ok(power.is_quiesced()),
            self.timings.suspend_poll_interval,
            Some(self.timings.suspend_timeout),
        )
        .await;

        let power = match outcome {
            Ok(power) => power,
            Err(PollError::Timeout { elapsed }) => {
                error!(
                    alert = true,
                    workload_id,
                    ?elapsed,
                    "instance failed to quiesce after abort"
                );
                return Err(ProvisionError::QuiesceTimeout {
                    workload_id,
                    elapsed,
                });
            }
            Err(PollError::Failed(e)) => return Err(e),
        };

        // One last write so the row reflects the abort even if a heartbeat
        // landed between the final re-assertion and the quiesced read.
        self.pin_failed(workload_id, reason)?;
        self.record_power(workload_id, power)?;
        info!(workload_id, power_state = ?power, "workload quiesced");
        Ok(power)
    }

    fn pin_failed(&self, workload_id: WorkloadId, reason: &str) -> ProvisionResult<()> {
        pin(&self.guests, workload_id, reason)
    }

    fn record_power(&self, workload_id: WorkloadId, power: PowerState) -> ProvisionResult<()> {
        self.state.update_workload(workload_id, |w| {
            w.power_state = power;
            w.vm_state = VmState::Error;
            w.updated_at = epoch_secs();
            Ok(())
        })?;
        Ok(())
    }
}

/// Write FAILED. A guest row that is already gone does not stop the
/// instance from being quiesced.
fn pin(guests: &GuestStatusStore, workload_id: WorkloadId, reason: &str) -> ProvisionResult<()> {
    match guests.update(workload_id, GuestState::Failed, Some(reason)) {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => {
            warn!(workload_id, "no live guest status row to pin FAILED");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dbgrid_drivers::{FakeCompute, FakeComputeBehavior};

    use super::*;

    fn timings() -> Timings {
        Timings {
            guest_init_timeout: Duration::from_millis(50),
            guest_poll_interval: Duration::from_millis(5),
            suspend_timeout: Duration::from_millis(100),
            suspend_poll_interval: Duration::from_millis(5),
            volume_timeout: Duration::from_millis(50),
            volume_poll_interval: Duration::from_millis(5),
        }
    }

    async fn setup(compute: FakeCompute) -> (StateStore, Arc<FakeCompute>, AbortProcedure, WorkloadId) {
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
        let compute = Arc::new(compute);
        compute.boot(&workload).await.unwrap();
        let abort = AbortProcedure::new(state.clone(), compute.clone(), timings());
        (state, compute, abort, workload.id)
    }

    #[tokio::test]
    async fn abort_quiesces_and_pins_failed() {
        let (state, compute, abort, id) = setup(FakeCompute::new()).await;

        let power = abort.run(id, "boot failed").await.unwrap();
        assert_eq!(power, PowerState::Suspended);
        assert_eq!(compute.suspend_calls(), 1);

        let guest = GuestStatusStore::new(state.clone()).get(id).unwrap();
        assert_eq!(guest.state, GuestState::Failed);
        assert_eq!(guest.description, "boot failed");

        let workload = state.get_workload(id).unwrap().unwrap();
        assert_eq!(workload.vm_state, VmState::Error);
        assert_eq!(workload.power_state, PowerState::Suspended);
    }

    #[tokio::test]
    async fn any_quiesced_state_is_accepted() {
        for target in PowerState::QUIESCED {
            let (_, _, abort, id) = setup(FakeCompute::with_behavior(FakeComputeBehavior {
                suspend_to: Some(target),
                ..FakeComputeBehavior::default()
            }))
            .await;
            assert_eq!(abort.run(id, "x").await.unwrap(), target);
        }
    }

    #[tokio::test]
    async fn shutoff_is_not_quiesced() {
        let (_, _, abort, id) = setup(FakeCompute::with_behavior(FakeComputeBehavior {
            suspend_to: Some(PowerState::Shutoff),
            ..FakeComputeBehavior::default()
        }))
        .await;
        let err = abort.run(id, "x").await.unwrap_err();
        assert!(matches!(err, ProvisionError::QuiesceTimeout { workload_id, .. } if workload_id == id));
    }

    #[tokio::test]
    async fn stuck_instance_surfaces_quiesce_timeout() {
        let (state, _, abort, id) = setup(FakeCompute::stuck()).await;

        let err = abort.run(id, "guest init timed out").await.unwrap_err();
        assert!(matches!(err, ProvisionError::QuiesceTimeout { .. }));
        assert!(err.is_timeout());

        // The guest is still pinned even though quiesce failed.
        let guest = GuestStatusStore::new(state).get(id).unwrap();
        assert_eq!(guest.state, GuestState::Failed);
    }

    #[tokio::test]
    async fn missing_instance_needs_no_quiesce() {
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
        let abort = AbortProcedure::new(state.clone(), Arc::new(FakeCompute::new()), timings());

        assert_eq!(abort.run(workload.id, "x").await.unwrap(), PowerState::Failed);
        let guest = GuestStatusStore::new(state).get(workload.id).unwrap();
        assert_eq!(guest.state, GuestState::Failed);
    }

    #[tokio::test]
    async fn missing_guest_row_still_quiesces() {
        let (state, compute, abort, id) = setup(FakeCompute::new()).await;
        GuestStatusStore::new(state.clone()).soft_delete(id).unwrap();

        assert_eq!(abort.run(id, "x").await.unwrap(), PowerState::Suspended);
        assert_eq!(compute.suspend_calls(), 1);
        assert_eq!(
            state.get_workload(id).unwrap().unwrap().vm_state,
            VmState::Error
        );
    }

    #[tokio::test]
    async fn reasserts_failed_while_polling() {
        let (state, _, abort, id) = setup(FakeCompute::with_behavior(FakeComputeBehavior {
            quiesce_after_polls: 10,
            ..FakeComputeBehavior::default()
        }))
        .await;
        let guests = GuestStatusStore::new(state);

        // A confused agent keeps reporting RUNNING while the abort polls.
        let writer = {
            let guests = guests.clone();
            tokio::spawn(async move {
                for _ in 0..8 {
                    let _ = guests.update(id, GuestState::Running, None);
                    tokio::time::sleep(Duration::from_millis(3)).await;
                }
            })
        };

        abort.run(id, "x").await.unwrap();
        writer.await.unwrap();
        assert_eq!(guests.get(id).unwrap().state, GuestState::Failed);
    }
}
