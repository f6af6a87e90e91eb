//! dbgrid cluster: compute host membership.
//!
//! Hosts register once, then heartbeat periodically. A host is *up* when
//! its last heartbeat falls within the liveness window and it has not been
//! disabled by an operator. The scheduler reads hosts through the
//! [`HostInventory`] seam so tests can substitute a fixed host list.

pub mod membership;

pub use membership::{HostInventory, HostRegistry, HostStatus, run_heartbeat};
