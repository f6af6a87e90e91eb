//! Volume driver interface and a simulated backend over the state store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use dbgrid_state::*;

use crate::error::{DriverError, DriverResult};

/// Block volume lifecycle.
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Request a new volume. It starts in `creating`; poll [`get`](Self::get)
    /// for `available`.
    async fn create(&self, size_gb: u32, display_name: &str) -> DriverResult<VolumeId>;

    async fn get(&self, volume_id: &str) -> DriverResult<Volume>;

    /// Associate an available volume with a workload (`in-use`).
    async fn attach(&self, volume_id: &str, workload_id: WorkloadId) -> DriverResult<Volume>;

    async fn delete(&self, volume_id: &str) -> DriverResult<()>;

    /// Unassociated `available` volumes last updated before `older_than`
    /// (unix seconds).
    async fn list_orphans(&self, older_than: u64) -> DriverResult<Vec<Volume>>;
}

/// Simulated volume backend persisting into the `volumes` table.
pub struct FakeVolumes {
    state: StateStore,
    ready_after: Option<Duration>,
    failing_deletes: Arc<Mutex<HashSet<VolumeId>>>,
}

impl FakeVolumes {
    /// Volumes become `available` immediately.
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            ready_after: Some(Duration::ZERO),
            failing_deletes: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Volumes become `available` after `delay`.
    pub fn with_ready_after(mut self, delay: Duration) -> Self {
        self.ready_after = Some(delay);
        self
    }

    /// Volumes stay `creating` forever.
    pub fn never_ready(mut self) -> Self {
        self.ready_after = None;
        self
    }

    /// Make every delete of `volume_id` fail.
    pub async fn fail_delete_of(&self, volume_id: &str) {
        self.failing_deletes
            .lock()
            .await
            .insert(volume_id.to_string());
    }

    fn mark_available(state: &StateStore, volume_id: &str) -> DriverResult<()> {
        let Some(mut volume) = state.get_volume(volume_id)? else {
            return Err(DriverError::VolumeNotFound(volume_id.to_string()));
        };
        if volume.status == VolumeStatus::Creating {
            volume.status = VolumeStatus::Available;
            volume.updated_at = epoch_secs();
            state.put_volume(&volume)?;
            debug!(volume_id, "[FAKE] volume available");
        }
        Ok(())
    }
}

#[async_trait]
impl VolumeDriver for FakeVolumes {
    async fn create(&self, size_gb: u32, display_name: &str) -> DriverResult<VolumeId> {
        let now = epoch_secs();
        let volume = Volume {
            id: new_uuid(),
            workload_id: None,
            size_gb,
            status: VolumeStatus::Creating,
            display_name: display_name.to_string(),
            display_description: format!("{size_gb} GB data volume for {display_name}"),
            created_at: now,
            updated_at: now,
        };
        self.state.put_volume(&volume)?;
        info!(volume_id = %volume.id, size_gb, "[FAKE] volume requested");

        match self.ready_after {
            Some(delay) if delay.is_zero() => Self::mark_available(&self.state, &volume.id)?,
            Some(delay) => {
                let state = self.state.clone();
                let volume_id = volume.id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = Self::mark_available(&state, &volume_id) {
                        debug!(%volume_id, error = %e, "[FAKE] volume vanished before ready");
                    }
                });
            }
            None => {}
        }
        Ok(volume.id)
    }

    async fn get(&self, volume_id: &str) -> DriverResult<Volume> {
        self.state
            .get_volume(volume_id)?
            .ok_or_else(|| DriverError::VolumeNotFound(volume_id.to_string()))
    }

    async fn attach(&self, volume_id: &str, workload_id: WorkloadId) -> DriverResult<Volume> {
        let mut volume = self.get(volume_id).await?;
        if volume.status != VolumeStatus::Available {
            return Err(DriverError::Volume {
                volume_id: volume_id.to_string(),
                reason: format!("cannot attach volume in status {:?}", volume.status),
            });
        }
        volume.workload_id = Some(workload_id);
        volume.status = VolumeStatus::InUse;
        volume.updated_at = epoch_secs();
        self.state.put_volume(&volume)?;
        info!(volume_id, workload_id, "[FAKE] volume attached");
        Ok(volume)
    }

    async fn delete(&self, volume_id: &str) -> DriverResult<()> {
        if self.failing_deletes.lock().await.contains(volume_id) {
            warn!(volume_id, "[FAKE] simulated volume delete failure");
            return Err(DriverError::Volume {
                volume_id: volume_id.to_string(),
                reason: "simulated delete failure".to_string(),
            });
        }
        if self.state.delete_volume(volume_id)? {
            info!(volume_id, "[FAKE] volume deleted");
            Ok(())
        } else {
            Err(DriverError::VolumeNotFound(volume_id.to_string()))
        }
    }

    async fn list_orphans(&self, older_than: u64) -> DriverResult<Vec<Volume>> {
        Ok(self.state.list_orphan_volumes(older_than)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volumes() -> (StateStore, FakeVolumes) {
        let state = StateStore::open_in_memory().unwrap();
        (state.clone(), FakeVolumes::new(state))
    }

    #[tokio::test]
    async fn create_is_immediately_available() {
        let (_, driver) = volumes();
        let id = driver.create(10, "db").await.unwrap();
        let volume = driver.get(&id).await.unwrap();
        assert_eq!(volume.status, VolumeStatus::Available);
        assert_eq!(volume.size_gb, 10);
        assert!(volume.workload_id.is_none());
    }

    #[tokio::test]
    async fn delayed_volume_becomes_available() {
        let (state, _) = volumes();
        let driver = FakeVolumes::new(state).with_ready_after(Duration::from_millis(20));
        let id = driver.create(5, "db").await.unwrap();
        assert_eq!(driver.get(&id).await.unwrap().status, VolumeStatus::Creating);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(driver.get(&id).await.unwrap().status, VolumeStatus::Available);
    }

    #[tokio::test]
    async fn never_ready_stays_creating() {
        let (state, _) = volumes();
        let driver = FakeVolumes::new(state).never_ready();
        let id = driver.create(5, "db").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(driver.get(&id).await.unwrap().status, VolumeStatus::Creating);
    }

    #[tokio::test]
    async fn attach_marks_in_use() {
        let (_, driver) = volumes();
        let id = driver.create(10, "db").await.unwrap();
        let volume = driver.attach(&id, 7).await.unwrap();
        assert_eq!(volume.workload_id, Some(7));
        assert_eq!(volume.status, VolumeStatus::InUse);

        // Attaching twice is rejected.
        assert!(driver.attach(&id, 8).await.is_err());
    }

    #[tokio::test]
    async fn delete_and_missing() {
        let (_, driver) = volumes();
        let id = driver.create(10, "db").await.unwrap();
        driver.delete(&id).await.unwrap();
        assert!(driver.delete(&id).await.unwrap_err().is_missing());
        assert!(driver.get(&id).await.unwrap_err().is_missing());
    }

    #[tokio::test]
    async fn injected_delete_failure() {
        let (_, driver) = volumes();
        let id = driver.create(10, "db").await.unwrap();
        driver.fail_delete_of(&id).await;

        let err = driver.delete(&id).await.unwrap_err();
        assert!(!err.is_missing());
        assert!(driver.get(&id).await.is_ok());
    }

    #[tokio::test]
    async fn orphans_exclude_attached_volumes() {
        let (_, driver) = volumes();
        let loose = driver.create(10, "loose").await.unwrap();
        let attached = driver.create(10, "attached").await.unwrap();
        driver.attach(&attached, 1).await.unwrap();

        let orphans = driver.list_orphans(u64::MAX).await.unwrap();
        let ids: Vec<_> = orphans.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec![loose.as_str()]);
    }
}
