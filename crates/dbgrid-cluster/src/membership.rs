//! Host registry: tracks compute hosts and their liveness.
//!
//! Hosts are persisted as [`HostRecord`]s in the `StateStore`. Liveness is
//! never stored: it is derived from `last_heartbeat` against the
//! configured window every time it is asked for.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use dbgrid_placement::{HostAggregate, host_aggregate};
use dbgrid_state::*;

/// Derived status of a registered host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    Up,
    /// No heartbeat within the liveness window.
    Down,
    /// Taken out of scheduling by an operator.
    Disabled,
}

/// Read side of the registry used by the scheduler.
pub trait HostInventory: Send + Sync {
    /// Compute hosts in listing order with committed memory and liveness.
    fn compute_hosts(&self) -> StateResult<Vec<HostAggregate>>;

    /// Whether `host` is registered, enabled, and heartbeating.
    fn is_up(&self, host: &str) -> StateResult<bool>;
}

/// Manages compute host registration and heartbeats.
#[derive(Clone)]
pub struct HostRegistry {
    state: StateStore,
    liveness_window: Duration,
}

impl HostRegistry {
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            liveness_window: Duration::from_secs(60),
        }
    }

    /// Set the heartbeat window within which a host counts as up.
    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    /// Register (or re-register) a compute host.
    ///
    /// Re-registering keeps the original `created_at` and the disabled
    /// flag, and counts as a heartbeat.
    pub fn register(&self, host: &str, availability_zone: &str) -> StateResult<HostRecord> {
        let now = epoch_secs();
        let record = match self.state.get_host(host)? {
            Some(mut existing) => {
                existing.availability_zone = availability_zone.to_string();
                existing.last_heartbeat = now;
                existing
            }
            None => HostRecord {
                host: host.to_string(),
                availability_zone: availability_zone.to_string(),
                service: COMPUTE_SERVICE.to_string(),
                last_heartbeat: now,
                disabled: false,
                created_at: now,
            },
        };
        self.state.put_host(&record)?;
        info!(%host, zone = %availability_zone, "compute host registered");
        Ok(record)
    }

    /// Record a heartbeat now. Returns `false` for unknown hosts.
    pub fn heartbeat(&self, host: &str) -> StateResult<bool> {
        self.heartbeat_at(host, epoch_secs())
    }

    /// Record a heartbeat at an explicit timestamp.
    pub fn heartbeat_at(&self, host: &str, at: u64) -> StateResult<bool> {
        match self.state.get_host(host)? {
            Some(mut record) => {
                record.last_heartbeat = at;
                self.state.put_host(&record)?;
                debug!(%host, "heartbeat received");
                Ok(true)
            }
            None => {
                warn!(%host, "heartbeat from unknown host");
                Ok(false)
            }
        }
    }

    /// Take a host out of scheduling. Returns `false` for unknown hosts.
    pub fn disable(&self, host: &str) -> StateResult<bool> {
        self.set_disabled(host, true)
    }

    pub fn enable(&self, host: &str) -> StateResult<bool> {
        self.set_disabled(host, false)
    }

    fn set_disabled(&self, host: &str, disabled: bool) -> StateResult<bool> {
        let Some(mut record) = self.state.get_host(host)? else {
            return Ok(false);
        };
        record.disabled = disabled;
        self.state.put_host(&record)?;
        info!(%host, disabled, "host scheduling flag changed");
        Ok(true)
    }

    /// Remove a host record entirely.
    pub fn deregister(&self, host: &str) -> StateResult<bool> {
        let existed = self.state.delete_host(host)?;
        if existed {
            info!(%host, "compute host deregistered");
        }
        Ok(existed)
    }

    /// Status of a host record as of `now`.
    pub fn status_at(&self, record: &HostRecord, now: u64) -> HostStatus {
        if record.disabled {
            HostStatus::Disabled
        } else if now.saturating_sub(record.last_heartbeat) > self.liveness_window.as_secs() {
            HostStatus::Down
        } else {
            HostStatus::Up
        }
    }

    /// Status of `host`, or `None` if it was never registered.
    pub fn status(&self, host: &str) -> StateResult<Option<HostStatus>> {
        let now = epoch_secs();
        Ok(self
            .state
            .get_host(host)?
            .map(|record| self.status_at(&record, now)))
    }

    /// Compute hosts in name order with committed memory and liveness.
    pub fn list_compute_hosts(&self) -> StateResult<Vec<HostAggregate>> {
        let now = epoch_secs();
        let committed = self.state.committed_memory_by_host()?;
        Ok(self
            .state
            .list_hosts()?
            .into_iter()
            .filter(|r| r.service == COMPUTE_SERVICE)
            .map(|r| {
                let up = self.status_at(&r, now) == HostStatus::Up;
                host_aggregate(&r, &committed, up)
            })
            .collect())
    }
}

impl HostInventory for HostRegistry {
    fn compute_hosts(&self) -> StateResult<Vec<HostAggregate>> {
        self.list_compute_hosts()
    }

    fn is_up(&self, host: &str) -> StateResult<bool> {
        Ok(self.status(host)? == Some(HostStatus::Up))
    }
}

/// Heartbeat `host` every `interval` until `shutdown` flips to `true`.
pub async fn run_heartbeat(
    registry: HostRegistry,
    host: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    info!(%host, interval_secs = interval.as_secs(), "host heartbeat started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match registry.heartbeat(&host) {
                    Ok(true) => {}
                    Ok(false) => warn!(%host, "heartbeat rejected: host not registered"),
                    Err(e) => warn!(%host, error = %e, "heartbeat write failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!(%host, "host heartbeat shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (StateStore, HostRegistry) {
        let state = StateStore::open_in_memory().unwrap();
        (state.clone(), HostRegistry::new(state))
    }

    fn bind(state: &StateStore, host: &str, memory_mb: u64) -> WorkloadId {
        let w = state
            .create_workload(
                &WorkloadDraft {
                    account: "tenant".to_string(),
                    name: format!("db-{memory_mb}"),
                    memory_mb,
                    vcpus: 1,
                    availability_zone: None,
                    volume_size_gb: None,
                },
                1000,
            )
            .unwrap();
        assert_eq!(
            state.bind_workload_host(w.id, host, u64::MAX, 1000).unwrap(),
            BindOutcome::Bound
        );
        w.id
    }

    #[test]
    fn register_and_list() {
        let (_, reg) = registry();
        reg.register("h2", "nova").unwrap();
        reg.register("h1", "nova").unwrap();

        let hosts = reg.list_compute_hosts().unwrap();
        let names: Vec<_> = hosts.iter().map(|h| h.host.as_str()).collect();
        assert_eq!(names, vec!["h1", "h2"]);
        assert!(hosts.iter().all(|h| h.is_up && h.committed_memory_mb == 0));
    }

    #[test]
    fn reregister_keeps_disabled_flag() {
        let (_, reg) = registry();
        let first = reg.register("h1", "nova").unwrap();
        reg.disable("h1").unwrap();

        let again = reg.register("h1", "az2").unwrap();
        assert!(again.disabled);
        assert_eq!(again.created_at, first.created_at);
        assert_eq!(again.availability_zone, "az2");
    }

    #[test]
    fn committed_memory_excludes_deleted_workloads() {
        let (state, reg) = registry();
        reg.register("h1", "nova").unwrap();
        reg.register("h2", "nova").unwrap();
        bind(&state, "h1", 512);
        let gone = bind(&state, "h1", 1024);
        bind(&state, "h2", 2048);

        state
            .update_workload(gone, |w| {
                w.deleted = true;
                Ok(())
            })
            .unwrap();

        let hosts = reg.list_compute_hosts().unwrap();
        assert_eq!(hosts[0].committed_memory_mb, 512);
        assert_eq!(hosts[1].committed_memory_mb, 2048);
    }

    #[test]
    fn stale_heartbeat_is_down() {
        let (_, reg) = registry();
        let reg = reg.with_liveness_window(Duration::from_secs(60));
        reg.register("h1", "nova").unwrap();

        // Simulate a host that last reported long ago.
        assert!(reg.heartbeat_at("h1", 1000).unwrap());
        assert_eq!(reg.status("h1").unwrap(), Some(HostStatus::Down));
        assert!(!reg.is_up("h1").unwrap());

        assert!(reg.heartbeat("h1").unwrap());
        assert!(reg.is_up("h1").unwrap());
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let (_, reg) = registry();
        let reg = reg.with_liveness_window(Duration::from_secs(60));
        let mut record = reg.register("h1", "nova").unwrap();

        record.last_heartbeat = 1000;
        assert_eq!(reg.status_at(&record, 1060), HostStatus::Up);
        assert_eq!(reg.status_at(&record, 1061), HostStatus::Down);
        // Clock skew: a heartbeat from the future still counts as up.
        assert_eq!(reg.status_at(&record, 900), HostStatus::Up);
    }

    #[test]
    fn disabled_host_is_never_up() {
        let (_, reg) = registry();
        reg.register("h1", "nova").unwrap();
        assert!(reg.disable("h1").unwrap());
        reg.heartbeat("h1").unwrap();

        assert_eq!(reg.status("h1").unwrap(), Some(HostStatus::Disabled));
        assert!(!reg.list_compute_hosts().unwrap()[0].is_up);

        reg.enable("h1").unwrap();
        assert!(reg.is_up("h1").unwrap());
    }

    #[test]
    fn unknown_host() {
        let (_, reg) = registry();
        assert!(!reg.heartbeat("ghost").unwrap());
        assert!(!reg.disable("ghost").unwrap());
        assert_eq!(reg.status("ghost").unwrap(), None);
        assert!(!reg.is_up("ghost").unwrap());
    }

    #[test]
    fn non_compute_services_are_not_listed() {
        let (state, reg) = registry();
        reg.register("h1", "nova").unwrap();
        state
            .put_host(&HostRecord {
                host: "vol1".to_string(),
                availability_zone: "nova".to_string(),
                service: "volume".to_string(),
                last_heartbeat: epoch_secs(),
                disabled: false,
                created_at: 1,
            })
            .unwrap();

        let hosts = reg.list_compute_hosts().unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].host, "h1");
    }

    #[test]
    fn deregister_removes_host() {
        let (_, reg) = registry();
        reg.register("h1", "nova").unwrap();
        assert!(reg.deregister("h1").unwrap());
        assert!(!reg.deregister("h1").unwrap());
        assert!(reg.list_compute_hosts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn heartbeat_loop_stops_on_shutdown() {
        let (_, reg) = registry();
        reg.register("h1", "nova").unwrap();
        reg.heartbeat_at("h1", 1000).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_heartbeat(
            reg.clone(),
            "h1".to_string(),
            Duration::from_millis(10),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(reg.is_up("h1").unwrap());
    }
}
