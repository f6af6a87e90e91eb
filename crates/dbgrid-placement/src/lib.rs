//! dbgrid placement: host ranking and selection policies.
//!
//! This crate is pure: it ranks [`HostAggregate`]s and decides which hosts
//! may accept a workload. It never writes state; binding is done by
//! `dbgrid-scheduler`.
//!
//! # Components
//!
//! - **`scorer`**: Host aggregates, ceiling fit, ranking by committed memory
//! - **`placer`**: `SchedulerPolicy` implementations and the policy factory
//! - **`convert`**: Type conversions from state store types

pub mod convert;
pub mod placer;
pub mod scorer;

pub use convert::{host_aggregate, workload_request};
pub use placer::{FirstFit, LeastLoaded, PolicyKind, SchedulerPolicy, UnknownPolicy, build_policy, candidates};
pub use scorer::{HostAggregate, PlacementRequest, rank_by_committed_memory};
