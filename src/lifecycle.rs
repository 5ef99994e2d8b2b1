//! Remote volume lifecycle: create-and-wait, extend, delete, query.

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;

use crate::controlplane::{
    ControlPlaneError, GIB, Volume, VolumeControlPlane, VolumeSpec, VolumeStatus,
};
use crate::error::StoreError;

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);
const STATUS_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Rounds a byte count up to the backend's GiB allocation granularity,
/// with a 1 GiB floor for empty or unknown sizes.
#[must_use]
pub fn gib_for_bytes(bytes: u64) -> u64 {
    bytes.div_ceil(GIB).max(1)
}

/// Volume lifecycle operations with bounded state-transition polling.
#[derive(Clone, Copy, Debug)]
pub struct VolumeLifecycle {
    poll_interval: Duration,
    wait_timeout: Duration,
}

impl Default for VolumeLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeLifecycle {
    /// Creates a lifecycle manager with the default poll bounds.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_interval: STATUS_POLL_INTERVAL,
            wait_timeout: STATUS_WAIT_TIMEOUT,
        }
    }

    /// Overrides the status poll interval.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overrides the state-transition wait timeout.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Creates a volume and waits until the backend reports it available.
    ///
    /// A volume that reaches an error state or never becomes available
    /// within the wait window is deleted best-effort before the error is
    /// surfaced.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when creation is rejected or the
    /// volume lands in an error state, and [`StoreError::Timeout`] when the
    /// wait window expires.
    pub async fn create_available<C>(
        &self,
        client: &C,
        spec: &VolumeSpec,
    ) -> Result<Volume, StoreError>
    where
        C: VolumeControlPlane + ?Sized,
    {
        let created = client.create_volume(spec).await?;
        match self.await_status(client, created.id, "volume creation").await {
            Ok(volume) => Ok(volume),
            Err(err) => {
                self.delete_quietly(client, created.id).await;
                Err(err)
            }
        }
    }

    /// Grows a volume and waits until the backend reports the new size.
    ///
    /// Failure here is fatal for the current operation; the caller performs
    /// cleanup. No retry is attempted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when the backend rejects the resize
    /// and [`StoreError::Timeout`] when the size never catches up.
    pub async fn extend<C>(
        &self,
        client: &C,
        volume_id: Uuid,
        new_size_gib: u64,
    ) -> Result<(), StoreError>
    where
        C: VolumeControlPlane + ?Sized,
    {
        client.extend_volume(volume_id, new_size_gib).await?;

        let deadline = Instant::now() + self.wait_timeout;
        while Instant::now() <= deadline {
            let volume = client.get_volume(volume_id).await?;
            if volume.status.is_error() {
                return Err(StoreError::backend(format!(
                    "volume {volume_id} entered state '{}' during resize",
                    volume.status.as_str()
                )));
            }
            if volume.size_gib >= new_size_gib && volume.status != VolumeStatus::Extending {
                return Ok(());
            }
            sleep(self.poll_interval).await;
        }

        Err(StoreError::Timeout {
            action: String::from("volume resize"),
            volume_id,
        })
    }

    /// Deletes a volume, treating an already-missing volume as success.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] for any backend failure other than
    /// the volume not existing.
    pub async fn delete<C>(&self, client: &C, volume_id: Uuid) -> Result<(), StoreError>
    where
        C: VolumeControlPlane + ?Sized,
    {
        match client.delete_volume(volume_id).await {
            Ok(()) | Err(ControlPlaneError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Best-effort delete used on cleanup paths: failures are logged so the
    /// original error always reaches the caller.
    pub async fn delete_quietly<C>(&self, client: &C, volume_id: Uuid)
    where
        C: VolumeControlPlane + ?Sized,
    {
        if let Err(err) = self.delete(client, volume_id).await {
            warn!("cleanup failed to delete volume {volume_id}: {err}");
        }
    }

    /// Fetches a status snapshot without attaching a device.
    ///
    /// # Errors
    ///
    /// Propagates control-plane failures as [`StoreError::Backend`].
    pub async fn query<C>(&self, client: &C, volume_id: Uuid) -> Result<Volume, StoreError>
    where
        C: VolumeControlPlane + ?Sized,
    {
        Ok(client.get_volume(volume_id).await?)
    }

    async fn await_status<C>(
        &self,
        client: &C,
        volume_id: Uuid,
        action: &str,
    ) -> Result<Volume, StoreError>
    where
        C: VolumeControlPlane + ?Sized,
    {
        let deadline = Instant::now() + self.wait_timeout;
        while Instant::now() <= deadline {
            let volume = client.get_volume(volume_id).await?;
            if volume.status == VolumeStatus::Available {
                return Ok(volume);
            }
            if volume.status.is_error() {
                return Err(StoreError::backend(format!(
                    "volume {volume_id} entered state '{}' during {action}",
                    volume.status.as_str()
                )));
            }
            sleep(self.poll_interval).await;
        }

        Err(StoreError::Timeout {
            action: action.to_owned(),
            volume_id,
        })
    }
}
