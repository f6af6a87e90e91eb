//! dbgrid-drivers: the collaborators the control plane drives.
//!
//! Each collaborator is a capability trait:
//!
//! - [`ComputeDriver`]: boot, power state, suspend, destroy
//! - [`VolumeDriver`]: block volume lifecycle and orphan listing
//! - [`GuestAgent`]: the fire-and-forget "prepare" message to the
//!   in-guest agent
//!
//! Implementations are selected by name from a closed set through
//! [`DriverRegistry`]. The only backend shipped here is `"fake"`, an
//! in-process simulation used by tests and by `dbgridd standalone`.

pub mod agent;
pub mod compute;
pub mod error;
pub mod registry;
pub mod volume;

pub use agent::{AgentBehavior, DatabaseSpecs, FakeGuestAgent, GuestAgent};
pub use compute::{ComputeDriver, FakeCompute, FakeComputeBehavior};
pub use error::{DriverError, DriverResult};
pub use registry::{DriverKind, DriverRegistry, DriverSet};
pub use volume::{FakeVolumes, VolumeDriver};
