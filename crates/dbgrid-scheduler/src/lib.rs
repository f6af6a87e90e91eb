//! dbgrid-scheduler: capacity scheduling for database workloads.
//!
//! Binds each workload to exactly one compute host. Hosts come from a
//! [`HostInventory`](dbgrid_cluster::HostInventory), ordering comes from a
//! [`SchedulerPolicy`](dbgrid_placement::SchedulerPolicy), and the binding
//! itself is a compare-and-swap in the state store.
//!
//! # Architecture
//!
//! ```text
//! CapacityScheduler
//!   ├── HostInventory (compute hosts, committed memory, liveness)
//!   ├── SchedulerPolicy (candidate order)
//!   └── StateStore (bind_workload_host CAS)
//! ```

pub mod context;
pub mod error;
pub mod scheduler;

pub use context::RequestContext;
pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::CapacityScheduler;
