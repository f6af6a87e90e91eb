//! redb table definitions for the dbgrid state store.
//!
//! Values are JSON-serialized domain types. Workload-scoped tables are keyed
//! by the numeric workload id; volumes and hosts by their string names.

use redb::TableDefinition;

/// Workloads keyed by local workload id.
pub const WORKLOADS: TableDefinition<u64, &[u8]> = TableDefinition::new("workloads");

/// Guest status rows, 1:1 with workloads.
pub const GUEST_STATUS: TableDefinition<u64, &[u8]> = TableDefinition::new("guest_status");

/// Volumes keyed by volume id.
pub const VOLUMES: TableDefinition<&str, &[u8]> = TableDefinition::new("volumes");

/// Host service records keyed by host name.
pub const HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");

/// Monotonic counters keyed by name.
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

/// Counter key for workload id allocation.
pub const WORKLOAD_ID_COUNTER: &str = "workload_id";
