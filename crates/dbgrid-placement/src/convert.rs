//! Type conversions between state store types and placement types.
//!
//! Bridges `dbgrid_state::{HostRecord, Workload}` to the placement
//! engine's `HostAggregate` and `PlacementRequest`.

use std::collections::HashMap;

use dbgrid_state::{HostName, HostRecord, Workload};

use crate::scorer::{HostAggregate, PlacementRequest};

/// Build a [`HostAggregate`] from a host record.
///
/// `is_up` is passed externally because liveness depends on the cluster
/// layer's heartbeat window, not on the stored record alone.
pub fn host_aggregate(
    record: &HostRecord,
    committed: &HashMap<HostName, u64>,
    is_up: bool,
) -> HostAggregate {
    HostAggregate {
        host: record.host.clone(),
        availability_zone: record.availability_zone.clone(),
        committed_memory_mb: committed.get(&record.host).copied().unwrap_or(0),
        is_up,
    }
}

/// Convert a [`Workload`] to a [`PlacementRequest`] under `ceiling_mb`.
pub fn workload_request(workload: &Workload, ceiling_mb: u64) -> PlacementRequest {
    PlacementRequest {
        memory_mb: workload.memory_mb,
        ceiling_mb,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_host_has_zero_committed() {
        let record = HostRecord {
            host: "h9".to_string(),
            availability_zone: "nova".to_string(),
            service: dbgrid_state::COMPUTE_SERVICE.to_string(),
            last_heartbeat: 10,
            disabled: false,
            created_at: 1,
        };
        let mut committed = HashMap::new();
        committed.insert("h1".to_string(), 4096);

        let agg = host_aggregate(&record, &committed, true);
        assert_eq!(agg.committed_memory_mb, 0);
        assert_eq!(agg.availability_zone, "nova");
        assert!(agg.is_up);

        committed.insert("h9".to_string(), 512);
        assert_eq!(host_aggregate(&record, &committed, false).committed_memory_mb, 512);
    }
}
