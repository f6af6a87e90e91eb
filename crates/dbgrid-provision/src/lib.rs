//! dbgrid-provision: drives a workload from request to running database.
//!
//! # Stages
//!
//! ```text
//! SCHEDULING ──▶ BOOTING ──▶ GUEST_INITIALIZING ──▶ RUNNING
//!     │             │                │
//!     ▼             └───────┬────────┘
//!   FAILED                  ▼
//!                       ABORTING ──▶ FAILED
//! ```
//!
//! Scheduling failures go straight to FAILED: nothing was provisioned.
//! Boot and guest-initialization failures run the [`AbortProcedure`],
//! which pins the guest status to FAILED and waits for the instance to
//! quiesce. An instance that will not quiesce surfaces as
//! [`ProvisionError::QuiesceTimeout`].

pub mod abort;
pub mod error;
pub mod orchestrator;
pub mod timings;

pub use abort::AbortProcedure;
pub use error::{ProvisionError, ProvisionResult};
pub use orchestrator::{ProvisionStage, Provisioner};
pub use timings::Timings;
