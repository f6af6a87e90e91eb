//! Domain types for the dbgrid state store.
//!
//! These types represent the persisted state of workloads, their guest
//! status, block-storage volumes, and registered compute hosts. All types
//! are serializable to/from JSON for storage in redb tables.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Local numeric identifier of a workload.
pub type WorkloadId = u64;

/// Identifier of a block-storage volume.
pub type VolumeId = String;

/// Name of a compute host.
pub type HostName = String;

// ── Workload ──────────────────────────────────────────────────────

/// A single provisioned database-service unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workload {
    pub id: WorkloadId,
    /// External identifier handed to API consumers.
    pub uuid: String,
    pub account: String,
    pub name: String,
    /// Compute host, set exactly once by the scheduler.
    pub host: Option<HostName>,
    /// Memory footprint (MB), denormalized from the flavor.
    pub memory_mb: u64,
    pub vcpus: u32,
    /// `"zone"` or `"zone:host"`.
    pub availability_zone: Option<String>,
    pub volume_size_gb: Option<u32>,
    pub volume_id: Option<VolumeId>,
    pub vm_state: VmState,
    /// Last power state observed from the compute driver.
    pub power_state: PowerState,
    pub created_at: u64,
    pub updated_at: u64,
    pub deleted: bool,
    pub deleted_at: Option<u64>,
}

impl Workload {
    /// The explicit host pin, if the availability zone is `zone:host`.
    pub fn pinned_host(&self) -> Option<&str> {
        let az = self.availability_zone.as_deref()?;
        let (_, host) = az.split_once(':')?;
        (!host.is_empty()).then_some(host)
    }
}

/// Request-time attributes of a new workload.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadDraft {
    pub account: String,
    pub name: String,
    pub memory_mb: u64,
    pub vcpus: u32,
    pub availability_zone: Option<String>,
    pub volume_size_gb: Option<u32>,
}

/// Coarse lifecycle of the workload record itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Building,
    Active,
    Error,
    Deleted,
}

/// Power state reported by the compute driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    Nostate,
    Running,
    Blocked,
    Paused,
    Shutdown,
    Shutoff,
    Crashed,
    Suspended,
    Failed,
    Building,
}

impl PowerState {
    /// States in which an instance can no longer mutate shared state.
    pub const QUIESCED: [PowerState; 5] = [
        PowerState::Crashed,
        PowerState::Failed,
        PowerState::Paused,
        PowerState::Suspended,
        PowerState::Shutdown,
    ];

    pub fn is_quiesced(self) -> bool {
        Self::QUIESCED.contains(&self)
    }
}

// ── Guest status ─────────────────────────────────────────────────

/// Lifecycle state of the in-guest agent and its database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuestState {
    Building,
    Running,
    Blocked,
    Paused,
    Shutdown,
    Crashed,
    Failed,
    Unknown,
}

impl GuestState {
    /// Wire code used by guest agents when reporting status.
    pub fn code(self) -> u8 {
        match self {
            GuestState::Running => 0x01,
            GuestState::Blocked => 0x02,
            GuestState::Paused => 0x03,
            GuestState::Shutdown => 0x04,
            GuestState::Crashed => 0x06,
            GuestState::Failed => 0x08,
            GuestState::Building => 0x09,
            GuestState::Unknown => 0x16,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        [
            GuestState::Running,
            GuestState::Blocked,
            GuestState::Paused,
            GuestState::Shutdown,
            GuestState::Crashed,
            GuestState::Failed,
            GuestState::Building,
            GuestState::Unknown,
        ]
        .into_iter()
        .find(|s| s.code() == code)
    }

    /// Canonical description stored when the reporter gives none.
    pub fn description(self) -> &'static str {
        match self {
            GuestState::Building => "building",
            GuestState::Running => "running",
            GuestState::Blocked => "blocked",
            GuestState::Paused => "paused",
            GuestState::Shutdown => "shutdown",
            GuestState::Crashed => "crashed",
            GuestState::Failed => "failed to spawn",
            GuestState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GuestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// One row per workload: authoritative usability of the guest service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuestStatus {
    pub workload_id: WorkloadId,
    pub state: GuestState,
    pub description: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub deleted: bool,
    pub deleted_at: Option<u64>,
}

impl GuestStatus {
    pub fn building(workload_id: WorkloadId, now: u64) -> Self {
        Self {
            workload_id,
            state: GuestState::Building,
            description: GuestState::Building.description().to_string(),
            created_at: now,
            updated_at: now,
            deleted: false,
            deleted_at: None,
        }
    }
}

// ── Volume ───────────────────────────────────────────────────────

/// A block-storage unit. Orphaned when `workload_id` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Volume {
    pub id: VolumeId,
    pub workload_id: Option<WorkloadId>,
    pub size_gb: u32,
    pub status: VolumeStatus,
    pub display_name: String,
    pub display_description: String,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeStatus {
    Creating,
    Available,
    InUse,
    Deleting,
    Error,
}

// ── Host ─────────────────────────────────────────────────────────

/// Service record of a compute host, refreshed by heartbeats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostRecord {
    pub host: HostName,
    pub availability_zone: String,
    /// Service running on the host, e.g. "compute".
    pub service: String,
    /// Unix timestamp of the last heartbeat.
    pub last_heartbeat: u64,
    pub disabled: bool,
    pub created_at: u64,
}

/// Service name of hosts eligible for workloads.
pub const COMPUTE_SERVICE: &str = "compute";

/// Result of a host-binding compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The workload is now bound to the host.
    Bound,
    /// The workload already had a host; nothing was written.
    AlreadyBound(HostName),
    /// The host would exceed the ceiling; nothing was written.
    OverCeiling { committed_mb: u64 },
}

/// Generate a fresh external workload identifier.
pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload_with_az(az: Option<&str>) -> Workload {
        Workload {
            id: 1,
            uuid: new_uuid(),
            account: "acct".to_string(),
            name: "db".to_string(),
            host: None,
            memory_mb: 512,
            vcpus: 1,
            availability_zone: az.map(str::to_string),
            volume_size_gb: None,
            volume_id: None,
            vm_state: VmState::Building,
            power_state: PowerState::Nostate,
            created_at: 0,
            updated_at: 0,
            deleted: false,
            deleted_at: None,
        }
    }

    #[test]
    fn pinned_host_parses_zone_host() {
        assert_eq!(workload_with_az(Some("nova:h1")).pinned_host(), Some("h1"));
        assert_eq!(workload_with_az(Some("nova")).pinned_host(), None);
        assert_eq!(workload_with_az(Some("nova:")).pinned_host(), None);
        assert_eq!(workload_with_az(None).pinned_host(), None);
    }

    #[test]
    fn quiesced_allow_list() {
        for s in [
            PowerState::Crashed,
            PowerState::Failed,
            PowerState::Paused,
            PowerState::Suspended,
            PowerState::Shutdown,
        ] {
            assert!(s.is_quiesced(), "{s:?}");
        }
        assert!(!PowerState::Running.is_quiesced());
        assert!(!PowerState::Shutoff.is_quiesced());
        assert!(!PowerState::Building.is_quiesced());
    }

    #[test]
    fn guest_state_codes_roundtrip() {
        assert_eq!(GuestState::from_code(0x01), Some(GuestState::Running));
        assert_eq!(GuestState::from_code(0x08), Some(GuestState::Failed));
        assert_eq!(GuestState::from_code(0x7f), None);
        assert_eq!(GuestState::Shutdown.to_string(), "shutdown");
    }

    #[test]
    fn volume_status_serializes_kebab_case() {
        let json = serde_json::to_string(&VolumeStatus::InUse).unwrap();
        assert_eq!(json, "\"in-use\"");
    }
}
