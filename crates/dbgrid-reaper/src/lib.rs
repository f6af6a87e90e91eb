//! dbgrid-reaper: periodic cleanup of resources nobody owns.
//!
//! - **`reaper`**: one sweep: orphaned volumes past the grace window,
//!   and workloads stuck building past the build timeout
//! - **`worker`**: runs a sweep on a fixed interval until shutdown
//!
//! Sweeps are best-effort and idempotent. A failure on one item is logged
//! and the sweep moves on.

pub mod reaper;
pub mod worker;

pub use reaper::{OrphanReaper, ReapStats};
pub use worker::ReaperWorker;
