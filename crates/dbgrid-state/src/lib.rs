//! dbgrid-state: embedded state store for dbgrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for workloads, guest status rows, volumes, and compute hosts.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Workload-scoped tables (`workloads`, `guest_status`) are keyed by the
//! numeric workload id, which is allocated from a counter table.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. [`GuestStatusStore`] layers the
//! guest-status lifecycle rules on top of it.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod error;
pub mod guest;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use guest::GuestStatusStore;
pub use store::StateStore;
pub use types::*;

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
