//! Capacity scheduler: picks a host for a workload and binds it.
//!
//! Candidates are ranked from a snapshot of committed memory, but the
//! binding is a compare-and-swap that recomputes the host's committed
//! memory inside the write transaction. A candidate that filled up after
//! the snapshot was taken is skipped and the next one is tried, so a host
//! can never be committed past the ceiling by concurrent requests.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use dbgrid_cluster::HostInventory;
use dbgrid_core::SchedulerConfig;
use dbgrid_placement::{SchedulerPolicy, build_policy, candidates, workload_request};
use dbgrid_state::*;

use crate::context::RequestContext;
use crate::error::{SchedulerError, SchedulerResult};

pub struct CapacityScheduler {
    state: StateStore,
    hosts: Arc<dyn HostInventory>,
    policy: Box<dyn SchedulerPolicy>,
    memory_ceiling_mb: u64,
}

impl CapacityScheduler {
    pub fn new(
        state: StateStore,
        hosts: Arc<dyn HostInventory>,
        policy: Box<dyn SchedulerPolicy>,
        memory_ceiling_mb: u64,
    ) -> Self {
        Self {
            state,
            hosts,
            policy,
            memory_ceiling_mb,
        }
    }

    /// Build from the `[scheduler]` config section.
    pub fn from_config(
        state: StateStore,
        hosts: Arc<dyn HostInventory>,
        config: &SchedulerConfig,
    ) -> SchedulerResult<Self> {
        let policy = build_policy(&config.policy)?;
        Ok(Self::new(state, hosts, policy, config.memory_ceiling_mb))
    }

    pub fn memory_ceiling_mb(&self) -> u64 {
        self.memory_ceiling_mb
    }

    /// Select a host for `workload_id`, bind it, and return the host name.
    ///
    /// An explicit `zone:host` pin is honored only for admin callers and
    /// skips ranking and the ceiling check. Otherwise hosts are tried in
    /// policy order and the first one that accepts the bind wins.
    pub fn schedule(
        &self,
        ctx: &RequestContext,
        workload_id: WorkloadId,
    ) -> SchedulerResult<HostName> {
        let workload = self
            .state
            .get_workload(workload_id)?
            .filter(|w| !w.deleted)
            .ok_or(SchedulerError::WorkloadNotFound(workload_id))?;

        if let Some(host) = &workload.host {
            return Err(SchedulerError::AlreadyScheduled {
                workload_id,
                host: host.clone(),
            });
        }

        if let Some(pinned) = workload.pinned_host() {
            if ctx.is_admin {
                return self.bind_pinned(workload_id, pinned);
            }
            warn!(
                workload_id,
                account = %ctx.account,
                pinned_host = %pinned,
                "host pin requires admin; ignoring pin"
            );
        }

        let requested_mb = workload.memory_mb;
        let hosts = self.hosts.compute_hosts()?;
        let request = workload_request(&workload, self.memory_ceiling_mb);

        for candidate in candidates(self.policy.as_ref(), &hosts, &request) {
            match self.bind(workload_id, &candidate.host, self.memory_ceiling_mb)? {
                BindOutcome::Bound => {
                    info!(
                        workload_id,
                        host = %candidate.host,
                        requested_mb,
                        committed_mb = candidate.committed_memory_mb,
                        policy = %self.policy.kind(),
                        "workload scheduled"
                    );
                    return Ok(candidate.host.clone());
                }
                BindOutcome::OverCeiling { committed_mb } => {
                    debug!(
                        workload_id,
                        host = %candidate.host,
                        committed_mb,
                        "host filled up since ranking; trying next"
                    );
                }
                BindOutcome::AlreadyBound(host) => {
                    return Err(SchedulerError::AlreadyScheduled { workload_id, host });
                }
            }
        }

        error!(
            alert = true,
            workload_id,
            requested_mb,
            ceiling_mb = self.memory_ceiling_mb,
            hosts = hosts.len(),
            "out of capacity: no compute host can fit workload"
        );
        Err(SchedulerError::OutOfCapacity { requested_mb })
    }

    fn bind_pinned(&self, workload_id: WorkloadId, host: &str) -> SchedulerResult<HostName> {
        if !self.hosts.is_up(host)? {
            warn!(workload_id, %host, "pinned host is not up");
            return Err(SchedulerError::HostUnavailable {
                host: host.to_string(),
            });
        }

        match self.bind(workload_id, host, u64::MAX)? {
            BindOutcome::Bound => {
                info!(workload_id, %host, "workload bound to pinned host");
                Ok(host.to_string())
            }
            BindOutcome::AlreadyBound(host) => {
                Err(SchedulerError::AlreadyScheduled { workload_id, host })
            }
            // Unreachable with an unbounded ceiling, short of u64 overflow.
            BindOutcome::OverCeiling { .. } => Err(SchedulerError::HostUnavailable {
                host: host.to_string(),
            }),
        }
    }

    fn bind(&self, workload_id: WorkloadId, host: &str, ceiling_mb: u64) -> SchedulerResult<BindOutcome> {
        self.state
            .bind_workload_host(workload_id, host, ceiling_mb, epoch_secs())
            .map_err(|e| {
                if e.is_not_found() {
                    SchedulerError::WorkloadNotFound(workload_id)
                } else {
                    SchedulerError::State(e)
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use dbgrid_cluster::HostRegistry;
    use dbgrid_placement::{FirstFit, HostAggregate, LeastLoaded};

    use super::*;

    const CEILING: u64 = 15360;

    struct Fixture {
        state: StateStore,
        registry: HostRegistry,
        scheduler: CapacityScheduler,
    }

    fn fixture(hosts: &[&str]) -> Fixture {
        let state = StateStore::open_in_memory().unwrap();
        let registry = HostRegistry::new(state.clone()).with_liveness_window(Duration::from_secs(60));
        for h in hosts {
            registry.register(h, "nova").unwrap();
        }
        let scheduler = CapacityScheduler::new(
            state.clone(),
            Arc::new(registry.clone()),
            Box::new(LeastLoaded),
            CEILING,
        );
        Fixture {
            state,
            registry,
            scheduler,
        }
    }

    fn workload(state: &StateStore, memory_mb: u64, zone: Option<&str>) -> WorkloadId {
        state
            .create_workload(
                &WorkloadDraft {
                    account: "tenant".to_string(),
                    name: "db".to_string(),
                    memory_mb,
                    vcpus: 1,
                    availability_zone: zone.map(str::to_string),
                    volume_size_gb: None,
                },
                1000,
            )
            .unwrap()
            .id
    }

    /// Commit `memory_mb` on `host` by binding a filler workload.
    fn commit(state: &StateStore, host: &str, memory_mb: u64) {
        let id = workload(state, memory_mb, None);
        assert_eq!(
            state.bind_workload_host(id, host, u64::MAX, 1000).unwrap(),
            BindOutcome::Bound
        );
    }

    fn tenant() -> RequestContext {
        RequestContext::tenant("tenant")
    }

    // ── Ranking ────────────────────────────────────────────────────

    #[test]
    fn empty_host_is_chosen() {
        let f = fixture(&["h1", "h2"]);
        commit(&f.state, "h2", 1024);

        let id = workload(&f.state, 512, None);
        assert_eq!(f.scheduler.schedule(&tenant(), id).unwrap(), "h1");
        assert_eq!(f.state.get_workload(id).unwrap().unwrap().host.as_deref(), Some("h1"));
    }

    #[test]
    fn out_of_capacity_when_only_host_is_full() {
        let f = fixture(&["h1"]);
        commit(&f.state, "h1", 15000);

        let id = workload(&f.state, 512, None);
        let err = f.scheduler.schedule(&tenant(), id).unwrap_err();
        assert!(matches!(err, SchedulerError::OutOfCapacity { requested_mb: 512 }));
        assert!(err.is_placement_failure());
        assert!(f.state.get_workload(id).unwrap().unwrap().host.is_none());
    }

    #[test]
    fn exact_fit_at_ceiling_is_accepted() {
        let f = fixture(&["h1"]);
        commit(&f.state, "h1", CEILING - 512);

        let id = workload(&f.state, 512, None);
        assert_eq!(f.scheduler.schedule(&tenant(), id).unwrap(), "h1");
    }

    #[test]
    fn lowest_committed_fitting_host_wins() {
        let f = fixture(&["a", "b", "c"]);
        commit(&f.state, "a", 15000);
        commit(&f.state, "b", 14000);
        commit(&f.state, "c", 15200);

        // b (14000) is the lowest and fits 1024; a and c do not.
        let id = workload(&f.state, 1024, None);
        assert_eq!(f.scheduler.schedule(&tenant(), id).unwrap(), "b");

        // b now holds 15024; nothing fits another 1024.
        let id = workload(&f.state, 1024, None);
        assert!(matches!(
            f.scheduler.schedule(&tenant(), id),
            Err(SchedulerError::OutOfCapacity { .. })
        ));
    }

    #[test]
    fn down_hosts_are_skipped() {
        let f = fixture(&["h1", "h2"]);
        f.registry.heartbeat_at("h1", 1000).unwrap();
        commit(&f.state, "h2", 4096);

        let id = workload(&f.state, 512, None);
        assert_eq!(f.scheduler.schedule(&tenant(), id).unwrap(), "h2");
    }

    #[test]
    fn no_hosts_is_out_of_capacity() {
        let f = fixture(&[]);
        let id = workload(&f.state, 512, None);
        assert!(matches!(
            f.scheduler.schedule(&tenant(), id),
            Err(SchedulerError::OutOfCapacity { requested_mb: 512 })
        ));
    }

    #[test]
    fn already_bound_workload_is_rejected() {
        let f = fixture(&["h1"]);
        let id = workload(&f.state, 512, None);
        f.scheduler.schedule(&tenant(), id).unwrap();

        assert!(matches!(
            f.scheduler.schedule(&tenant(), id),
            Err(SchedulerError::AlreadyScheduled { host, .. }) if host == "h1"
        ));
    }

    #[test]
    fn missing_workload_is_not_found() {
        let f = fixture(&["h1"]);
        assert!(matches!(
            f.scheduler.schedule(&tenant(), 42),
            Err(SchedulerError::WorkloadNotFound(42))
        ));
    }

    // ── Zone pin ───────────────────────────────────────────────────

    #[test]
    fn admin_pin_binds_to_pinned_host() {
        let f = fixture(&["h1", "h2"]);
        commit(&f.state, "h2", 8192);

        let id = workload(&f.state, 512, Some("nova:h2"));
        let host = f.scheduler.schedule(&RequestContext::admin("ops"), id).unwrap();
        assert_eq!(host, "h2");
    }

    #[test]
    fn admin_pin_to_down_host_is_unavailable() {
        let f = fixture(&["h1", "h2"]);
        f.registry.disable("h2").unwrap();

        let id = workload(&f.state, 512, Some("nova:h2"));
        let err = f
            .scheduler
            .schedule(&RequestContext::admin("ops"), id)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::HostUnavailable { ref host } if host == "h2"));
        assert!(f.state.get_workload(id).unwrap().unwrap().host.is_none());
    }

    #[test]
    fn admin_pin_to_unknown_host_is_unavailable() {
        let f = fixture(&["h1"]);
        let id = workload(&f.state, 512, Some("nova:ghost"));
        assert!(matches!(
            f.scheduler.schedule(&RequestContext::admin("ops"), id),
            Err(SchedulerError::HostUnavailable { .. })
        ));
    }

    #[test]
    fn tenant_pin_is_ignored() {
        let f = fixture(&["h1", "h2"]);
        commit(&f.state, "h2", 8192);

        let id = workload(&f.state, 512, Some("nova:h2"));
        assert_eq!(f.scheduler.schedule(&tenant(), id).unwrap(), "h1");
    }

    // ── Concurrency ────────────────────────────────────────────────

    /// Inventory frozen at a snapshot taken before other binds landed.
    struct StaleInventory(Vec<HostAggregate>);

    impl HostInventory for StaleInventory {
        fn compute_hosts(&self) -> StateResult<Vec<HostAggregate>> {
            Ok(self.0.clone())
        }

        fn is_up(&self, host: &str) -> StateResult<bool> {
            Ok(self.0.iter().any(|h| h.host == host && h.is_up))
        }
    }

    #[test]
    fn stale_snapshot_cannot_overcommit() {
        let state = StateStore::open_in_memory().unwrap();
        let snapshot = vec![
            HostAggregate {
                host: "h1".to_string(),
                availability_zone: "nova".to_string(),
                committed_memory_mb: 0,
                is_up: true,
            },
            HostAggregate {
                host: "h2".to_string(),
                availability_zone: "nova".to_string(),
                committed_memory_mb: 100,
                is_up: true,
            },
        ];
        let scheduler = CapacityScheduler::new(
            state.clone(),
            Arc::new(StaleInventory(snapshot)),
            Box::new(FirstFit),
            CEILING,
        );

        // h1 filled up after the snapshot was taken.
        commit(&state, "h1", 15000);

        let id = workload(&state, 512, None);
        assert_eq!(scheduler.schedule(&tenant(), id).unwrap(), "h2");
        assert_eq!(state.committed_memory_by_host().unwrap()["h1"], 15000);
    }

    #[test]
    fn concurrent_schedules_never_exceed_ceiling() {
        let f = fixture(&["h1"]);
        let scheduler = Arc::new(f.scheduler);

        // 40 x 512 MB = 20480 MB requested against a 15360 MB ceiling.
        let ids: Vec<_> = (0..40).map(|_| workload(&f.state, 512, None)).collect();
        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let scheduler = Arc::clone(&scheduler);
                std::thread::spawn(move || scheduler.schedule(&tenant(), id).is_ok())
            })
            .collect();
        let bound = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(bound, 30);
        assert_eq!(f.state.committed_memory_by_host().unwrap()["h1"], CEILING);
    }

    #[test]
    fn from_config_rejects_unknown_policy() {
        let state = StateStore::open_in_memory().unwrap();
        let registry = HostRegistry::new(state.clone());
        let config = SchedulerConfig {
            policy: "random".to_string(),
            ..SchedulerConfig::default()
        };
        let err = CapacityScheduler::from_config(state, Arc::new(registry), &config).err();
        assert!(matches!(err, Some(SchedulerError::Config(_))));
    }
}
