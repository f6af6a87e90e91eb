//! Host aggregates and memory-ceiling fit.
//!
//! A [`HostAggregate`] is derived at query time from the registered hosts
//! and the memory committed to non-deleted workloads on each of them. It is
//! recomputed for every scheduling decision and never stored.

use serde::{Deserialize, Serialize};

/// Per-host view used by scheduling decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAggregate {
    pub host: String,
    pub availability_zone: String,
    /// Sum of `memory_mb` over non-deleted workloads bound to this host.
    pub committed_memory_mb: u64,
    /// Heartbeat within the liveness window and not disabled.
    pub is_up: bool,
}

/// Resource request of a single workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub memory_mb: u64,
    /// Per-host memory ceiling (MB).
    pub ceiling_mb: u64,
}

impl PlacementRequest {
    /// `committed + requested <= ceiling`; exact fit is accepted.
    pub fn fits(&self, host: &HostAggregate) -> bool {
        host.committed_memory_mb
            .checked_add(self.memory_mb)
            .is_some_and(|total| total <= self.ceiling_mb)
    }

    /// Memory left on `host` after placing this request, if it fits.
    pub fn headroom_mb(&self, host: &HostAggregate) -> Option<u64> {
        self.fits(host)
            .then(|| self.ceiling_mb - host.committed_memory_mb - self.memory_mb)
    }
}

/// Order hosts ascending by committed memory.
///
/// The sort is stable: hosts with equal committed memory keep their
/// listing order.
pub fn rank_by_committed_memory(hosts: &[HostAggregate]) -> Vec<&HostAggregate> {
    let mut ranked: Vec<&HostAggregate> = hosts.iter().collect();
    ranked.sort_by_key(|h| h.committed_memory_mb);
    ranked
}
