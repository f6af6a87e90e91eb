//! Wait bounds for every polling stage.

use std::time::Duration;

use dbgrid_core::ProvisioningConfig;

/// Poll intervals and deadlines used by the orchestrator.
///
/// Built from [`ProvisioningConfig`] in production. Tests construct it
/// directly to run with millisecond bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub guest_init_timeout: Duration,
    pub guest_poll_interval: Duration,
    pub suspend_timeout: Duration,
    pub suspend_poll_interval: Duration,
    pub volume_timeout: Duration,
    pub volume_poll_interval: Duration,
}

impl From<&ProvisioningConfig> for Timings {
    fn from(config: &ProvisioningConfig) -> Self {
        Self {
            guest_init_timeout: config.guest_init_timeout(),
            guest_poll_interval: config.guest_poll_interval(),
            suspend_timeout: config.suspend_timeout(),
            suspend_poll_interval: config.suspend_poll_interval(),
            volume_timeout: config.volume_timeout(),
            volume_poll_interval: config.volume_poll_interval(),
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self::from(&ProvisioningConfig::default())
    }
}
