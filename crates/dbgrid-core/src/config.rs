//! dbgrid.toml configuration parser.
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below. Durations are stored as whole seconds in the file and
//! exposed as [`Duration`] through accessor methods.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GridConfig {
    pub scheduler: SchedulerConfig,
    pub provisioning: ProvisioningConfig,
    pub reaper: ReaperConfig,
    pub drivers: DriversConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Placement policy name: "least_loaded" or "first_fit".
    pub policy: String,
    /// Maximum memory a single host may have committed (MB).
    pub memory_ceiling_mb: u64,
    /// A host is up when its last heartbeat is within this window.
    pub host_liveness_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: "least_loaded".to_string(),
            memory_ceiling_mb: 15360,
            host_liveness_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn host_liveness(&self) -> Duration {
        Duration::from_secs(self.host_liveness_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub guest_init_timeout_secs: u64,
    pub guest_poll_interval_secs: u64,
    pub suspend_timeout_secs: u64,
    pub suspend_poll_interval_secs: u64,
    pub volume_timeout_secs: u64,
    pub volume_poll_interval_secs: u64,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            guest_init_timeout_secs: 600,
            guest_poll_interval_secs: 2,
            suspend_timeout_secs: 180,
            suspend_poll_interval_secs: 1,
            volume_timeout_secs: 120,
            volume_poll_interval_secs: 2,
        }
    }
}

impl ProvisioningConfig {
    pub fn guest_init_timeout(&self) -> Duration {
        Duration::from_secs(self.guest_init_timeout_secs)
    }

    pub fn guest_poll_interval(&self) -> Duration {
        Duration::from_secs(self.guest_poll_interval_secs)
    }

    pub fn suspend_timeout(&self) -> Duration {
        Duration::from_secs(self.suspend_timeout_secs)
    }

    pub fn suspend_poll_interval(&self) -> Duration {
        Duration::from_secs(self.suspend_poll_interval_secs)
    }

    pub fn volume_timeout(&self) -> Duration {
        Duration::from_secs(self.volume_timeout_secs)
    }

    pub fn volume_poll_interval(&self) -> Duration {
        Duration::from_secs(self.volume_poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReaperConfig {
    pub interval_secs: u64,
    /// Orphaned volumes older than this are deleted (default 7 days).
    pub volume_expiration_secs: u64,
    /// Workloads still building after this long are force-failed.
    pub build_timeout_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            volume_expiration_secs: 7 * 24 * 3600,
            build_timeout_secs: 3600,
        }
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Collaborator implementation names, resolved by the driver registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriversConfig {
    pub compute: String,
    pub volume: String,
    pub guest_agent: String,
}

impl Default for DriversConfig {
    fn default() -> Self {
        Self {
            compute: "fake".to_string(),
            volume: "fake".to_string(),
            guest_agent: "fake".to_string(),
        }
    }
}

impl GridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GridConfig::default();
        assert_eq!(config.scheduler.memory_ceiling_mb, 15360);
        assert_eq!(config.provisioning.guest_init_timeout(), Duration::from_secs(600));
        assert_eq!(config.provisioning.guest_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.provisioning.suspend_timeout(), Duration::from_secs(180));
        assert_eq!(config.provisioning.suspend_poll_interval(), Duration::from_secs(1));
        assert_eq!(config.reaper.volume_expiration_secs, 604_800);
        assert_eq!(config.drivers.compute, "fake");
    }

    #[test]
    fn parse_partial_file_keeps_defaults() {
        let toml_str = r#"
[scheduler]
memory_ceiling_mb = 2048

[provisioning]
guest_init_timeout_secs = 30
"#;
        let config: GridConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.memory_ceiling_mb, 2048);
        assert_eq!(config.scheduler.policy, "least_loaded");
        assert_eq!(config.provisioning.guest_init_timeout_secs, 30);
        assert_eq!(config.provisioning.suspend_timeout_secs, 180);
        assert_eq!(config.reaper, ReaperConfig::default());
    }

    #[test]
    fn roundtrips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbgrid.toml");
        let mut config = GridConfig::default();
        config.scheduler.policy = "first_fit".to_string();
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = GridConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_without_path_is_default() {
        assert_eq!(GridConfig::load(None).unwrap(), GridConfig::default());
    }
}
