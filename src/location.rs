//! Location URIs referencing stored images by their backing volume.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::StoreError;

/// URI prefix reported to the store registry.
pub const URI_PREFIX: &str = "cinder://";

/// Persisted reference to an image: the backing volume's id is the sole
/// locator. Volume size and status are never persisted and must be
/// re-queried from the control plane.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StoreLocation {
    /// Id of the volume holding the image payload.
    pub volume_id: Uuid,
}

impl StoreLocation {
    /// Builds a location for the given volume.
    #[must_use]
    pub const fn new(volume_id: Uuid) -> Self {
        Self { volume_id }
    }

    /// Parses a `cinder://<uuid>` URI.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidLocation`] when the scheme is not
    /// `cinder://` or the remainder is not a bare volume UUID.
    pub fn parse(uri: &str) -> Result<Self, StoreError> {
        let Some(volume_part) = uri.strip_prefix(URI_PREFIX) else {
            return Err(StoreError::InvalidLocation {
                uri: uri.to_owned(),
                reason: format!("expected scheme '{URI_PREFIX}'"),
            });
        };

        let volume_id = Uuid::from_str(volume_part).map_err(|err| StoreError::InvalidLocation {
            uri: uri.to_owned(),
            reason: format!("volume id is not a UUID: {err}"),
        })?;

        Ok(Self { volume_id })
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{URI_PREFIX}{}", self.volume_id)
    }
}

impl FromStr for StoreLocation {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}
