//! Volume-backed object store driver.
//!
//! The crate lets an image service persist and retrieve large binary
//! payloads as volumes on a Cinder-compatible block-storage service. The
//! [`store::Store`] facade composes session handling, volume lifecycle,
//! device attachment, and chunked streaming I/O into an atomic-feeling
//! add/get/delete contract: a location URI is only ever returned for a
//! fully written, fully released volume.

pub mod attach;
pub mod config;
pub mod context;
pub mod controlplane;
pub mod error;
pub mod io;
pub mod lifecycle;
pub mod location;
pub mod session;
pub mod store;
pub mod test_support;

pub use attach::{
    AttachError, AttachedDevice, ConnectorAttacher, DeviceAttacher, MultipathPolicy,
};
pub use config::{CinderStoreConfig, ConfigError};
pub use context::{CatalogEndpoint, CatalogEntry, RequestContext, check_context};
pub use controlplane::{
    ControlPlaneError, HttpControlPlane, HttpControlPlaneProvider, Volume, VolumeControlPlane,
    VolumeSpec, VolumeStatus,
};
pub use error::StoreError;
pub use io::{ImageStream, Verifier};
pub use lifecycle::VolumeLifecycle;
pub use location::{StoreLocation, URI_PREFIX};
pub use session::{ControlPlaneProvider, Session, SessionCache, SessionKey};
pub use store::{AddSummary, Store};
