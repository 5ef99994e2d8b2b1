//! Caller context supplied by the hosting image service.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Identity and service-catalog information for one request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RequestContext {
    /// Id of the user on whose behalf the operation runs.
    pub user_id: String,
    /// Project owning the stored images.
    pub project_id: String,
    /// Token proving the caller's identity to the block-storage service.
    pub auth_token: String,
    /// Service catalog published by the identity service.
    pub service_catalog: Vec<CatalogEntry>,
}

/// One service advertised in the caller's catalog.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CatalogEntry {
    /// Service name (for example `cinder`).
    pub name: String,
    /// Service type (for example `volumev3`).
    #[serde(rename = "type")]
    pub service_type: String,
    /// Endpoints published for the service.
    pub endpoints: Vec<CatalogEndpoint>,
}

/// A single endpoint of a catalog entry.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CatalogEndpoint {
    /// Publicly reachable URL for the service.
    pub public_url: String,
    /// Region the endpoint serves, when the deployment is region-scoped.
    #[serde(default)]
    pub region: Option<String>,
}

/// Checks that a caller is authorized to use the store.
///
/// Side-effect free; called before any remote operation that needs
/// authorization.
///
/// # Errors
///
/// Returns [`StoreError::BadStoreConfiguration`] when the context is absent
/// or its service catalog is empty.
pub fn check_context(context: Option<&RequestContext>) -> Result<(), StoreError> {
    match context {
        None => Err(StoreError::bad_configuration(
            "a request context is required to use the cinder store",
        )),
        Some(ctx) if ctx.service_catalog.is_empty() => Err(StoreError::bad_configuration(
            "the request context carries no service catalog",
        )),
        Some(_) => Ok(()),
    }
}
