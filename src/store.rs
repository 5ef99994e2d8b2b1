//! The public store surface composing sessions, lifecycle, attachment, and
//! streaming I/O.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::attach::{AttachedDevice, DeviceAttacher, MultipathPolicy, resolve_path_strategy};
use crate::config::CinderStoreConfig;
use crate::context::{RequestContext, check_context};
use crate::controlplane::{IMAGE_SIZE_METADATA_KEY, Volume, VolumeControlPlane, VolumeSpec};
use crate::error::StoreError;
use crate::io::{ImageStream, Verifier, WriteSummary, copy_to_device};
use crate::lifecycle::{VolumeLifecycle, gib_for_bytes};
use crate::location::{StoreLocation, URI_PREFIX};
use crate::session::{ControlPlaneProvider, Session, SessionCache};

/// Default chunk size for reads from an attached device.
pub const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Default chunk size for writes to an attached device.
pub const WRITE_CHUNK_SIZE: usize = 64 * 1024;

/// Outcome of a successful `add`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddSummary {
    /// Location URI referencing the backing volume.
    pub location: StoreLocation,
    /// Total payload bytes written.
    pub bytes_written: u64,
    /// Hex sha256 digest of the payload.
    pub checksum: String,
    /// Driver-specific metadata for the hosting service.
    pub metadata: HashMap<String, String>,
}

/// Volume-backed image store.
///
/// Each operation is an independent unit of work owning its volume and
/// attachment; the session cache is the only shared state.
pub struct Store<P, A>
where
    P: ControlPlaneProvider,
    A: DeviceAttacher,
{
    config: CinderStoreConfig,
    provider: P,
    attacher: Arc<A>,
    sessions: SessionCache<P::Client>,
    lifecycle: VolumeLifecycle,
    read_chunk_size: usize,
    write_chunk_size: usize,
    volume_type: Option<String>,
}

impl<P, A> Store<P, A>
where
    P: ControlPlaneProvider,
    A: DeviceAttacher,
{
    /// Creates a store over the given collaborators.
    #[must_use]
    pub fn new(config: CinderStoreConfig, provider: P, attacher: A) -> Self {
        let volume_type = config.volume_type.clone();
        Self {
            config,
            provider,
            attacher: Arc::new(attacher),
            sessions: SessionCache::new(),
            lifecycle: VolumeLifecycle::new(),
            read_chunk_size: READ_CHUNK_SIZE,
            write_chunk_size: WRITE_CHUNK_SIZE,
            volume_type,
        }
    }

    /// Overrides the read chunk size.
    #[must_use]
    pub const fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Overrides the write chunk size.
    #[must_use]
    pub const fn with_write_chunk_size(mut self, size: usize) -> Self {
        self.write_chunk_size = size;
        self
    }

    /// Overrides the status poll interval.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.lifecycle = self.lifecycle.with_poll_interval(interval);
        self
    }

    /// Overrides the state-transition wait timeout.
    ///
    /// This is primarily used by tests to keep timeout scenarios fast.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle = self.lifecycle.with_wait_timeout(timeout);
        self
    }

    /// URI prefix this store registers with the location registry.
    #[must_use]
    pub const fn url_prefix(&self) -> &'static str {
        URI_PREFIX
    }

    /// Validates static configuration eagerly.
    ///
    /// A partially configured credential override is rejected. A configured
    /// volume type is verified against the backend when the static
    /// credentials allow a context-free client; an unknown type is logged
    /// and treated as unset, and a type that cannot be verified is kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BadStoreConfiguration`] for unusable option
    /// combinations.
    pub async fn configure(&mut self) -> Result<(), StoreError> {
        self.config.validate()?;

        let Some(volume_type) = self.volume_type.clone() else {
            return Ok(());
        };
        if !self.config.has_static_credentials() {
            return Ok(());
        }

        let client = self.get_client(None).await?;
        match client.list_volume_types().await {
            Ok(types) => {
                if !types.contains(&volume_type) {
                    warn!(
                        "configured volume type '{volume_type}' does not exist on the backend; \
                         ignoring it"
                    );
                    self.volume_type = None;
                }
            }
            Err(err) => {
                warn!("could not verify volume type '{volume_type}': {err}");
            }
        }
        Ok(())
    }

    /// Returns the cached authenticated client for the caller's identity,
    /// building one on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BadStoreConfiguration`] when neither static
    /// credentials nor a catalog-derived endpoint are available, and
    /// propagates provider build failures.
    pub async fn get_client(
        &self,
        context: Option<&RequestContext>,
    ) -> Result<Arc<P::Client>, StoreError> {
        let session = Session::resolve(&self.config, context)?;
        self.sessions.client_for(&self.provider, &session).await
    }

    /// Drops all cached sessions, forcing re-authentication on next use.
    pub async fn reset_sessions(&self) {
        self.sessions.reset().await;
    }

    /// Stores an image payload as a new volume.
    ///
    /// The volume is created at the GiB ceiling of `size_hint` (minimum
    /// 1 GiB) and grown if the stream outruns it. On any failure after
    /// creation the volume is detached and deleted before the error is
    /// surfaced; a location is never returned for a partially written
    /// volume.
    ///
    /// # Errors
    ///
    /// Returns the taxonomy of [`StoreError`]: `BadStoreConfiguration`
    /// before any remote call, `StorageFull` when the device runs out of
    /// space, `Backend`/`Timeout` for control-plane and attach failures,
    /// and unmasked `Io` errors from the payload stream or device.
    pub async fn add<R: Read>(
        &self,
        image_id: Uuid,
        image: &mut R,
        size_hint: u64,
        context: Option<&RequestContext>,
        verifier: Option<&mut dyn Verifier>,
    ) -> Result<AddSummary, StoreError> {
        check_context(context)?;
        let client = self.get_client(context).await?;

        let mut metadata = HashMap::new();
        metadata.insert(String::from("image_id"), image_id.to_string());
        if let Some(ctx) = context {
            metadata.insert(String::from("image_owner"), ctx.project_id.clone());
        }
        let spec = VolumeSpec {
            name: format!("image-{image_id}"),
            size_gib: gib_for_bytes(size_hint),
            volume_type: self.volume_type.clone(),
            metadata,
        };

        let mut volume = self.lifecycle.create_available(client.as_ref(), &spec).await?;

        let summary = match self
            .write_volume(client.as_ref(), &mut volume, image, verifier)
            .await
        {
            Ok(summary) => summary,
            Err(err) => {
                self.lifecycle
                    .delete_quietly(client.as_ref(), volume.id)
                    .await;
                return Err(err);
            }
        };

        let mut size_metadata = HashMap::new();
        size_metadata.insert(
            String::from(IMAGE_SIZE_METADATA_KEY),
            summary.bytes_written.to_string(),
        );
        if let Err(err) = client
            .update_volume_metadata(volume.id, &size_metadata)
            .await
        {
            self.lifecycle
                .delete_quietly(client.as_ref(), volume.id)
                .await;
            return Err(err.into());
        }

        info!(
            "stored image {image_id} as volume {} ({} bytes)",
            volume.id, summary.bytes_written
        );
        Ok(AddSummary {
            location: StoreLocation::new(volume.id),
            bytes_written: summary.bytes_written,
            checksum: summary.checksum_hex,
            metadata: HashMap::new(),
        })
    }

    /// Opens a pull-based chunk stream over a stored image.
    ///
    /// The returned stream reports the image's byte size and detaches its
    /// device once exhausted or closed.
    ///
    /// # Errors
    ///
    /// Propagates context, session, query, and attach failures; no volume
    /// cleanup is performed since nothing was created.
    pub async fn get(
        &self,
        location: &StoreLocation,
        context: Option<&RequestContext>,
    ) -> Result<ImageStream<A>, StoreError> {
        check_context(context)?;
        let client = self.get_client(context).await?;
        let volume = self
            .lifecycle
            .query(client.as_ref(), location.volume_id)
            .await?;

        let device = self.attach_with_policy(volume.id).await?;
        let file = match File::open(device.device_path.as_std_path()) {
            Ok(file) => file,
            Err(err) => {
                self.detach_quietly(&device).await;
                return Err(err.into());
            }
        };

        Ok(ImageStream::new(
            Arc::clone(&self.attacher),
            device,
            file,
            volume.image_size_bytes(),
            self.read_chunk_size,
        ))
    }

    /// Returns the stored image's byte size without attaching a device.
    ///
    /// # Errors
    ///
    /// Propagates context, session, and query failures.
    pub async fn get_size(
        &self,
        location: &StoreLocation,
        context: Option<&RequestContext>,
    ) -> Result<u64, StoreError> {
        self.get_size_with_metadata(location, context)
            .await
            .map(|(size, _)| size)
    }

    /// Returns the stored image's byte size and the backing volume's
    /// metadata without attaching a device.
    ///
    /// # Errors
    ///
    /// Propagates context, session, and query failures.
    pub async fn get_size_with_metadata(
        &self,
        location: &StoreLocation,
        context: Option<&RequestContext>,
    ) -> Result<(u64, HashMap<String, String>), StoreError> {
        check_context(context)?;
        let client = self.get_client(context).await?;
        let volume = self
            .lifecycle
            .query(client.as_ref(), location.volume_id)
            .await?;
        Ok((volume.image_size_bytes(), volume.metadata))
    }

    /// Deletes the volume a location refers to.
    ///
    /// Deleting an already-missing volume is success; other backend errors
    /// surface directly.
    ///
    /// # Errors
    ///
    /// Propagates context, session, and backend failures.
    pub async fn delete(
        &self,
        location: &StoreLocation,
        context: Option<&RequestContext>,
    ) -> Result<(), StoreError> {
        check_context(context)?;
        let client = self.get_client(context).await?;
        self.lifecycle
            .delete(client.as_ref(), location.volume_id)
            .await
    }

    async fn write_volume<C>(
        &self,
        client: &C,
        volume: &mut Volume,
        image: &mut dyn Read,
        verifier: Option<&mut dyn Verifier>,
    ) -> Result<WriteSummary, StoreError>
    where
        C: VolumeControlPlane + ?Sized,
    {
        let device = self.attach_with_policy(volume.id).await?;
        let outcome = copy_to_device(
            client,
            &self.lifecycle,
            volume,
            &device.device_path,
            image,
            self.write_chunk_size,
            verifier,
        )
        .await;

        match (outcome, self.attacher.detach(&device).await) {
            (Ok(summary), Ok(())) => Ok(summary),
            // Success is only reported once the volume is fully released.
            (Ok(_), Err(detach_err)) => Err(detach_err.into()),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(detach_err)) => {
                warn!("detach failed while cleaning up a failed write: {detach_err}");
                Err(err)
            }
        }
    }

    async fn attach_with_policy(&self, volume_id: Uuid) -> Result<AttachedDevice, StoreError> {
        let policy = self.config.multipath_policy();
        let supported = match policy {
            MultipathPolicy::Disabled => false,
            MultipathPolicy::Enabled | MultipathPolicy::Enforced => {
                self.attacher.multipath_supported()
            }
        };
        let use_multipath = resolve_path_strategy(policy, supported, volume_id)?;
        Ok(self.attacher.attach(volume_id, use_multipath).await?)
    }

    async fn detach_quietly(&self, device: &AttachedDevice) {
        if let Err(err) = self.attacher.detach(device).await {
            warn!(
                "failed to detach device {} for volume {}: {err}",
                device.device_path, device.volume_id
            );
        }
    }
}
