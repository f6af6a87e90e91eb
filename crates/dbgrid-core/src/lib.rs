//! dbgrid-core: shared building blocks for the dbgrid control plane.
//!
//! - [`config`]: `dbgrid.toml` parsing with defaults for every knob
//! - [`poll`]: the bounded `poll_until` primitive used by every
//!   "wait for an async subsystem to reach state X" step

pub mod config;
pub mod poll;

pub use config::{DriversConfig, GridConfig, ProvisioningConfig, ReaperConfig, SchedulerConfig};
pub use poll::{PollError, poll_until};
