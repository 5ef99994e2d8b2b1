//! Error types surfaced by the store facade.

use thiserror::Error;
use uuid::Uuid;

use crate::attach::AttachError;
use crate::config::ConfigError;
use crate::controlplane::ControlPlaneError;

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Raised when static or context-derived credentials are missing or the
    /// configuration combination is unusable. Detected before any remote
    /// call, so no cleanup is ever required.
    #[error("bad store configuration: {reason}")]
    BadStoreConfiguration {
        /// Description of what is missing or inconsistent.
        reason: String,
    },
    /// Raised when a location URI cannot be parsed back into a volume id.
    #[error("invalid location '{uri}': {reason}")]
    InvalidLocation {
        /// The URI as supplied by the caller.
        uri: String,
        /// Why it was rejected.
        reason: String,
    },
    /// Raised when the device write hits a no-space condition. The volume is
    /// deleted before this error propagates.
    #[error("no space left writing image data to volume {volume_id}")]
    StorageFull {
        /// Volume that could not hold the image.
        volume_id: Uuid,
    },
    /// Raised when the control plane or the attach utility fails, rejects an
    /// operation, or reports an unexpected state.
    #[error("backend error: {message}")]
    Backend {
        /// Message describing the backend failure.
        message: String,
    },
    /// Raised when a bounded poll for a volume state transition expires.
    #[error("timeout waiting for {action} on volume {volume_id}")]
    Timeout {
        /// Action being waited on.
        action: String,
        /// Volume the wait was bound to.
        volume_id: Uuid,
    },
    /// Unrecognized low-level I/O failures, propagated unmasked after
    /// best-effort detach (and, on the write path, volume deletion).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn bad_configuration(reason: impl Into<String>) -> Self {
        Self::BadStoreConfiguration {
            reason: reason.into(),
        }
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

impl From<ConfigError> for StoreError {
    fn from(value: ConfigError) -> Self {
        Self::BadStoreConfiguration {
            reason: value.to_string(),
        }
    }
}

impl From<ControlPlaneError> for StoreError {
    fn from(value: ControlPlaneError) -> Self {
        Self::Backend {
            message: value.to_string(),
        }
    }
}

impl From<AttachError> for StoreError {
    fn from(value: AttachError) -> Self {
        Self::Backend {
            message: value.to_string(),
        }
    }
}
