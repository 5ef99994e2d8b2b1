//! Authenticated client sessions, cached per caller identity.
//!
//! The cache is an explicit object owned by the store rather than
//! process-wide state, so invalidation and test isolation do not depend on
//! globals.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::CinderStoreConfig;
use crate::context::RequestContext;
use crate::controlplane::VolumeControlPlane;
use crate::error::StoreError;

/// Catalog service type the block-storage endpoint is published under.
pub const BLOCK_STORAGE_SERVICE_TYPE: &str = "volumev3";

/// Catalog service name accepted as an alternative to the service type.
pub const BLOCK_STORAGE_SERVICE_NAME: &str = "cinder";

/// Credential material resolved for one caller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Session {
    /// Built from the statically configured service credentials.
    Password {
        /// Service user name.
        username: String,
        /// Service password.
        password: String,
        /// Project the service user operates in.
        project_name: String,
        /// Identity endpoint to authenticate against.
        auth_url: String,
        /// Optional region pin for endpoint selection.
        region: Option<String>,
    },
    /// Built from the caller's token and catalog-published endpoint.
    Token {
        /// Block-storage endpoint from the caller's service catalog.
        endpoint: String,
        /// The caller's auth token.
        token: String,
        /// Id of the calling user.
        user_id: String,
        /// Project the caller operates in.
        project_id: String,
    },
}

impl Session {
    /// Resolves credential material for a request.
    ///
    /// The static override wins when fully configured; otherwise the
    /// caller's catalog must publish a block-storage endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BadStoreConfiguration`] when neither a
    /// catalog-derived endpoint nor static credentials are available.
    pub fn resolve(
        config: &CinderStoreConfig,
        context: Option<&RequestContext>,
    ) -> Result<Self, StoreError> {
        if config.has_static_credentials() {
            return Ok(Self::Password {
                username: config.store_user_name.clone().unwrap_or_default(),
                password: config.store_password.clone().unwrap_or_default(),
                project_name: config.store_project_name.clone().unwrap_or_default(),
                auth_url: config.store_auth_address.clone().unwrap_or_default(),
                region: config.os_region_name.clone(),
            });
        }

        let Some(ctx) = context else {
            return Err(StoreError::bad_configuration(
                "no static cinder credentials configured and no request context supplied",
            ));
        };
        let endpoint = block_storage_endpoint(ctx, config.os_region_name.as_deref())?;
        Ok(Self::Token {
            endpoint,
            token: ctx.auth_token.clone(),
            user_id: ctx.user_id.clone(),
            project_id: ctx.project_id.clone(),
        })
    }

    /// Identity tuple this session is cached under.
    #[must_use]
    pub fn key(&self) -> SessionKey {
        match self {
            Self::Password {
                username,
                project_name,
                auth_url,
                region,
                ..
            } => SessionKey {
                user: username.clone(),
                project: project_name.clone(),
                authority: format!("{auth_url}#{}", region.as_deref().unwrap_or_default()),
            },
            Self::Token {
                endpoint,
                user_id,
                project_id,
                ..
            } => SessionKey {
                user: user_id.clone(),
                project: project_id.clone(),
                authority: endpoint.clone(),
            },
        }
    }
}

/// Resolves the public block-storage endpoint from a caller's catalog,
/// honouring the region pin when one is configured.
fn block_storage_endpoint(
    context: &RequestContext,
    region: Option<&str>,
) -> Result<String, StoreError> {
    let endpoint = context
        .service_catalog
        .iter()
        .filter(|entry| {
            entry.service_type == BLOCK_STORAGE_SERVICE_TYPE
                || entry.name == BLOCK_STORAGE_SERVICE_NAME
        })
        .flat_map(|entry| entry.endpoints.iter())
        .find(|endpoint| match region {
            Some(wanted) => endpoint.region.as_deref() == Some(wanted),
            None => true,
        })
        .map(|endpoint| endpoint.public_url.clone());

    endpoint.ok_or_else(|| {
        StoreError::bad_configuration(
            "the caller's service catalog publishes no block-storage endpoint",
        )
    })
}

/// Identity tuple used as the session-cache key.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SessionKey {
    /// User component of the identity.
    pub user: String,
    /// Project component of the identity.
    pub project: String,
    /// Endpoint or identity authority the session is bound to.
    pub authority: String,
}

/// Future returned by [`ControlPlaneProvider::build`].
pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Builds authenticated control-plane handles from resolved sessions.
pub trait ControlPlaneProvider {
    /// Handle type produced by this provider.
    type Client: VolumeControlPlane;

    /// Builds a client for the given session. Called once per identity;
    /// the result is cached until [`SessionCache::reset`].
    fn build<'a>(&'a self, session: &'a Session) -> ProviderFuture<'a, Self::Client>;
}

impl<T: ControlPlaneProvider> ControlPlaneProvider for Arc<T> {
    type Client = T::Client;

    fn build<'a>(&'a self, session: &'a Session) -> ProviderFuture<'a, Self::Client> {
        self.as_ref().build(session)
    }
}

/// Per-identity cache of built client handles.
///
/// Handles are shared via `Arc`, so replacing the cache contents is an
/// atomic swap from the point of view of in-flight operations: each holds
/// the handle it started with.
#[derive(Debug, Default)]
pub struct SessionCache<C> {
    clients: RwLock<HashMap<SessionKey, Arc<C>>>,
}

impl<C> SessionCache<C> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached handle for the session's identity, building and
    /// caching one when absent. Concurrent first calls for the same
    /// identity converge on a single handle.
    ///
    /// # Errors
    ///
    /// Propagates the provider's build failure.
    pub async fn client_for<P>(
        &self,
        provider: &P,
        session: &Session,
    ) -> Result<Arc<C>, StoreError>
    where
        P: ControlPlaneProvider<Client = C>,
    {
        let key = session.key();
        if let Some(client) = self.clients.read().await.get(&key) {
            return Ok(Arc::clone(client));
        }

        let built = provider.build(session).await?;
        let mut clients = self.clients.write().await;
        Ok(Arc::clone(
            clients.entry(key).or_insert_with(|| Arc::new(built)),
        ))
    }

    /// Drops every cached handle, forcing re-authentication on next use.
    pub async fn reset(&self) {
        self.clients.write().await.clear();
    }
}
