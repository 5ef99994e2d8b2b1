//! Mapping remote volumes to local block devices.
//!
//! The OS-level attach/detach and multipath discovery work is delegated to
//! an external connector utility behind the [`DeviceAttacher`] trait; the
//! driver only decides the path strategy and guarantees detach ordering.

mod connector;
mod runner;

use std::future::Future;
use std::pin::Pin;

use camino::Utf8PathBuf;
use thiserror::Error;
use uuid::Uuid;

pub use connector::ConnectorAttacher;
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner};

/// Path strategy for attaching a volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MultipathPolicy {
    /// Attach via the single reported path.
    Disabled,
    /// Use multipath when the host supports it, fall back silently
    /// otherwise.
    Enabled,
    /// Fail instead of falling back when no multipath device is available.
    Enforced,
}

/// Ephemeral mapping of a volume to a local device path, valid only
/// between attach and detach.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachedDevice {
    /// Volume backing the device.
    pub volume_id: Uuid,
    /// The single logical device path exposed to the I/O engine.
    pub device_path: Utf8PathBuf,
    /// Whether the path aggregates multiple physical paths.
    pub multipath: bool,
}

/// Errors raised while attaching or detaching devices.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AttachError {
    /// Multipath was enforced but no multipath device is available.
    #[error("multipath is enforced but volume {volume_id} has no usable multipath device")]
    MultipathUnavailable {
        /// Volume the attachment was requested for.
        volume_id: Uuid,
    },
    /// The connector utility rejected or failed the operation.
    #[error("attach operation failed for volume {volume_id}: {message}")]
    Failed {
        /// Volume the operation targeted.
        volume_id: Uuid,
        /// Error reported by the connector.
        message: String,
    },
    /// The connector reported success but the device node is unusable.
    #[error("device {path} reported for volume {volume_id} is not usable")]
    DeviceMissing {
        /// Volume the device belongs to.
        volume_id: Uuid,
        /// Path the connector reported.
        path: Utf8PathBuf,
    },
}

/// Future returned by attacher operations.
pub type AttachFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, AttachError>> + Send + 'a>>;

/// OS-level volume attachment service consumed by the driver.
pub trait DeviceAttacher {
    /// Whether the host can aggregate paths into a multipath device.
    fn multipath_supported(&self) -> bool;

    /// Attaches the volume and returns the logical device path.
    fn attach(&self, volume_id: Uuid, use_multipath: bool) -> AttachFuture<'_, AttachedDevice>;

    /// Releases the attachment. Always attempted after I/O, regardless of
    /// the I/O outcome.
    fn detach<'a>(&'a self, device: &'a AttachedDevice) -> AttachFuture<'a, ()>;
}

impl<T: DeviceAttacher> DeviceAttacher for std::sync::Arc<T> {
    fn multipath_supported(&self) -> bool {
        self.as_ref().multipath_supported()
    }

    fn attach(&self, volume_id: Uuid, use_multipath: bool) -> AttachFuture<'_, AttachedDevice> {
        self.as_ref().attach(volume_id, use_multipath)
    }

    fn detach<'a>(&'a self, device: &'a AttachedDevice) -> AttachFuture<'a, ()> {
        self.as_ref().detach(device)
    }
}

/// Decides whether to request a multipath attachment.
///
/// # Errors
///
/// Returns [`AttachError::MultipathUnavailable`] when the policy is
/// [`MultipathPolicy::Enforced`] and the host reports no multipath support.
pub const fn resolve_path_strategy(
    policy: MultipathPolicy,
    supported: bool,
    volume_id: Uuid,
) -> Result<bool, AttachError> {
    match policy {
        MultipathPolicy::Disabled => Ok(false),
        MultipathPolicy::Enabled => Ok(supported),
        MultipathPolicy::Enforced => {
            if supported {
                Ok(true)
            } else {
                Err(AttachError::MultipathUnavailable { volume_id })
            }
        }
    }
}
