//! Remote block-storage control-plane contract.
//!
//! The driver consumes volume CRUD through the [`VolumeControlPlane`] trait;
//! the production HTTP implementation lives in [`http`]. Test doubles live
//! in `test_support`.

pub mod http;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use uuid::Uuid;

pub use http::{HttpControlPlane, HttpControlPlaneProvider};

/// Bytes in one GiB, the backend's allocation granularity.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Metadata key under which the write path records the exact image byte
/// count.
pub const IMAGE_SIZE_METADATA_KEY: &str = "image_size";

/// Remote volume state as reported by the control plane.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VolumeStatus {
    /// Allocation in progress.
    Creating,
    /// Ready to be attached.
    Available,
    /// Attached to a host.
    InUse,
    /// Growing to a new size.
    Extending,
    /// Deletion in progress.
    Deleting,
    /// Backend reported a failure.
    Error,
    /// Deletion failed on the backend.
    ErrorDeleting,
    /// Any state this driver does not act on.
    Other(String),
}

impl VolumeStatus {
    /// Wire representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "creating",
            Self::Available => "available",
            Self::InUse => "in-use",
            Self::Extending => "extending",
            Self::Deleting => "deleting",
            Self::Error => "error",
            Self::ErrorDeleting => "error_deleting",
            Self::Other(text) => text.as_str(),
        }
    }

    /// True for the `error`/`error_deleting` family.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error | Self::ErrorDeleting)
    }
}

impl From<&str> for VolumeStatus {
    fn from(value: &str) -> Self {
        match value {
            "creating" => Self::Creating,
            "available" => Self::Available,
            "in-use" => Self::InUse,
            "extending" => Self::Extending,
            "deleting" => Self::Deleting,
            "error" => Self::Error,
            "error_deleting" => Self::ErrorDeleting,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for VolumeStatus {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

/// Locally cached snapshot of a remote volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Backend-assigned volume id.
    pub id: Uuid,
    /// Status at the time of the snapshot.
    pub status: VolumeStatus,
    /// Capacity in GiB.
    pub size_gib: u64,
    /// Free-form metadata stored with the volume.
    pub metadata: HashMap<String, String>,
}

impl Volume {
    /// Capacity of the volume in bytes.
    #[must_use]
    pub const fn capacity_bytes(&self) -> u64 {
        self.size_gib * GIB
    }

    /// Exact byte size of the stored image.
    ///
    /// The write path records the byte count under the `image_size` metadata
    /// key; volumes written before that key existed fall back to the
    /// GiB-granular capacity.
    #[must_use]
    pub fn image_size_bytes(&self) -> u64 {
        self.metadata
            .get(IMAGE_SIZE_METADATA_KEY)
            .and_then(|text| text.parse().ok())
            .unwrap_or_else(|| self.capacity_bytes())
    }
}

/// Parameters for creating a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeSpec {
    /// Display name (the driver uses `image-<image_id>`).
    pub name: String,
    /// Requested capacity in GiB.
    pub size_gib: u64,
    /// Volume type to request, when one is configured and known.
    pub volume_type: Option<String>,
    /// Metadata stored with the volume at creation.
    pub metadata: HashMap<String, String>,
}

/// Errors raised by control-plane implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ControlPlaneError {
    /// The referenced volume does not exist.
    #[error("volume {volume_id} not found")]
    NotFound {
        /// Volume id the backend did not recognize.
        volume_id: Uuid,
    },
    /// The backend rejected the request.
    #[error("control plane rejected the request (status {status}): {message}")]
    Api {
        /// HTTP status the backend answered with.
        status: u16,
        /// Body or reason returned by the backend.
        message: String,
    },
    /// The backend could not be reached or answered garbage.
    #[error("control plane unreachable: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },
}

/// Future returned by control-plane operations.
pub type ControlPlaneFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ControlPlaneError>> + Send + 'a>>;

/// Volume CRUD consumed by the driver.
pub trait VolumeControlPlane {
    /// Creates a volume; the returned snapshot is usually still `creating`.
    fn create_volume<'a>(&'a self, spec: &'a VolumeSpec) -> ControlPlaneFuture<'a, Volume>;

    /// Fetches a fresh status snapshot.
    fn get_volume(&self, volume_id: Uuid) -> ControlPlaneFuture<'_, Volume>;

    /// Grows the volume to `new_size_gib`.
    fn extend_volume(&self, volume_id: Uuid, new_size_gib: u64) -> ControlPlaneFuture<'_, ()>;

    /// Deletes the volume. Implementations report a missing volume as
    /// [`ControlPlaneError::NotFound`] so callers can treat deletes
    /// idempotently.
    fn delete_volume(&self, volume_id: Uuid) -> ControlPlaneFuture<'_, ()>;

    /// Merges `metadata` into the volume's metadata.
    fn update_volume_metadata<'a>(
        &'a self,
        volume_id: Uuid,
        metadata: &'a HashMap<String, String>,
    ) -> ControlPlaneFuture<'a, ()>;

    /// Names of the volume types the backend knows.
    fn list_volume_types(&self) -> ControlPlaneFuture<'_, Vec<String>>;
}

impl<C: VolumeControlPlane> VolumeControlPlane for std::sync::Arc<C> {
    fn create_volume<'a>(&'a self, spec: &'a VolumeSpec) -> ControlPlaneFuture<'a, Volume> {
        self.as_ref().create_volume(spec)
    }

    fn get_volume(&self, volume_id: Uuid) -> ControlPlaneFuture<'_, Volume> {
        self.as_ref().get_volume(volume_id)
    }

    fn extend_volume(&self, volume_id: Uuid, new_size_gib: u64) -> ControlPlaneFuture<'_, ()> {
        self.as_ref().extend_volume(volume_id, new_size_gib)
    }

    fn delete_volume(&self, volume_id: Uuid) -> ControlPlaneFuture<'_, ()> {
        self.as_ref().delete_volume(volume_id)
    }

    fn update_volume_metadata<'a>(
        &'a self,
        volume_id: Uuid,
        metadata: &'a HashMap<String, String>,
    ) -> ControlPlaneFuture<'a, ()> {
        self.as_ref().update_volume_metadata(volume_id, metadata)
    }

    fn list_volume_types(&self) -> ControlPlaneFuture<'_, Vec<String>> {
        self.as_ref().list_volume_types()
    }
}
