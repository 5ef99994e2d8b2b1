//! HTTP implementation of the control-plane contract.
//!
//! Speaks the block-storage v3 REST surface directly and performs one
//! password grant against the identity endpoint when the store is
//! configured with static credentials. Identity-domain names are pinned to
//! `Default`, matching the deployment model this driver targets.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::session::{
    BLOCK_STORAGE_SERVICE_NAME, BLOCK_STORAGE_SERVICE_TYPE, ControlPlaneProvider, ProviderFuture,
    Session,
};

use super::{ControlPlaneError, ControlPlaneFuture, Volume, VolumeControlPlane, VolumeSpec};

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
const IDENTITY_DOMAIN: &str = "Default";

/// Authenticated handle to one block-storage endpoint.
#[derive(Clone, Debug)]
pub struct HttpControlPlane {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Serialize)]
struct CreateVolumeBody<'a> {
    volume: CreateVolumePayload<'a>,
}

#[derive(Serialize)]
struct CreateVolumePayload<'a> {
    name: &'a str,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume_type: Option<&'a str>,
    metadata: &'a HashMap<String, String>,
}

#[derive(Serialize)]
struct ExtendBody {
    #[serde(rename = "os-extend")]
    os_extend: ExtendPayload,
}

#[derive(Serialize)]
struct ExtendPayload {
    new_size: u64,
}

#[derive(Serialize)]
struct MetadataBody<'a> {
    metadata: &'a HashMap<String, String>,
}

#[derive(Deserialize)]
struct VolumeEnvelope {
    volume: VolumeResource,
}

#[derive(Deserialize)]
struct VolumeResource {
    id: String,
    status: String,
    size: u64,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
struct TypeListEnvelope {
    volume_types: Vec<TypeResource>,
}

#[derive(Deserialize)]
struct TypeResource {
    name: String,
}

impl VolumeResource {
    fn into_volume(self) -> Result<Volume, ControlPlaneError> {
        let id = self.id.parse::<Uuid>().map_err(|err| {
            ControlPlaneError::Transport {
                message: format!("malformed volume id '{}': {err}", self.id),
            }
        })?;
        Ok(Volume {
            id,
            status: self.status.into(),
            size_gib: self.size,
            metadata: self.metadata,
        })
    }
}

fn transport(err: reqwest::Error) -> ControlPlaneError {
    ControlPlaneError::Transport {
        message: err.to_string(),
    }
}

impl HttpControlPlane {
    /// Creates a handle for the given endpoint and token.
    #[must_use]
    pub const fn new(http: reqwest::Client, base_url: String, token: String) -> Self {
        Self {
            http,
            base_url,
            token,
        }
    }

    fn volume_url(&self, volume_id: Uuid) -> String {
        format!("{}/volumes/{volume_id}", self.base_url)
    }

    async fn api_error(
        response: reqwest::Response,
        volume_id: Option<Uuid>,
    ) -> ControlPlaneError {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            if let Some(id) = volume_id {
                return ControlPlaneError::NotFound { volume_id: id };
            }
        }
        let message = response.text().await.unwrap_or_default();
        ControlPlaneError::Api {
            status: status.as_u16(),
            message,
        }
    }

    async fn send_expecting_volume(
        &self,
        request: reqwest::RequestBuilder,
        volume_id: Option<Uuid>,
    ) -> Result<Volume, ControlPlaneError> {
        let response = request
            .header(AUTH_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(Self::api_error(response, volume_id).await);
        }
        let envelope: VolumeEnvelope = response.json().await.map_err(transport)?;
        envelope.volume.into_volume()
    }

    async fn send_expecting_accepted(
        &self,
        request: reqwest::RequestBuilder,
        volume_id: Option<Uuid>,
    ) -> Result<(), ControlPlaneError> {
        let response = request
            .header(AUTH_TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(Self::api_error(response, volume_id).await);
        }
        Ok(())
    }
}

impl VolumeControlPlane for HttpControlPlane {
    fn create_volume<'a>(&'a self, spec: &'a VolumeSpec) -> ControlPlaneFuture<'a, Volume> {
        Box::pin(async move {
            let body = CreateVolumeBody {
                volume: CreateVolumePayload {
                    name: &spec.name,
                    size: spec.size_gib,
                    volume_type: spec.volume_type.as_deref(),
                    metadata: &spec.metadata,
                },
            };
            let request = self
                .http
                .post(format!("{}/volumes", self.base_url))
                .json(&body);
            self.send_expecting_volume(request, None).await
        })
    }

    fn get_volume(&self, volume_id: Uuid) -> ControlPlaneFuture<'_, Volume> {
        Box::pin(async move {
            let request = self.http.get(self.volume_url(volume_id));
            self.send_expecting_volume(request, Some(volume_id)).await
        })
    }

    fn extend_volume(&self, volume_id: Uuid, new_size_gib: u64) -> ControlPlaneFuture<'_, ()> {
        Box::pin(async move {
            let body = ExtendBody {
                os_extend: ExtendPayload {
                    new_size: new_size_gib,
                },
            };
            let request = self
                .http
                .post(format!("{}/action", self.volume_url(volume_id)))
                .json(&body);
            self.send_expecting_accepted(request, Some(volume_id)).await
        })
    }

    fn delete_volume(&self, volume_id: Uuid) -> ControlPlaneFuture<'_, ()> {
        Box::pin(async move {
            let request = self.http.delete(self.volume_url(volume_id));
            self.send_expecting_accepted(request, Some(volume_id)).await
        })
    }

    fn update_volume_metadata<'a>(
        &'a self,
        volume_id: Uuid,
        metadata: &'a HashMap<String, String>,
    ) -> ControlPlaneFuture<'a, ()> {
        Box::pin(async move {
            let body = MetadataBody { metadata };
            let request = self
                .http
                .post(format!("{}/metadata", self.volume_url(volume_id)))
                .json(&body);
            self.send_expecting_accepted(request, Some(volume_id)).await
        })
    }

    fn list_volume_types(&self) -> ControlPlaneFuture<'_, Vec<String>> {
        Box::pin(async move {
            let response = self
                .http
                .get(format!("{}/types", self.base_url))
                .header(AUTH_TOKEN_HEADER, &self.token)
                .send()
                .await
                .map_err(transport)?;
            if !response.status().is_success() {
                return Err(Self::api_error(response, None).await);
            }
            let envelope: TypeListEnvelope = response.json().await.map_err(transport)?;
            Ok(envelope
                .volume_types
                .into_iter()
                .map(|volume_type| volume_type.name)
                .collect())
        })
    }
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    auth: AuthPayload<'a>,
}

#[derive(Serialize)]
struct AuthPayload<'a> {
    identity: AuthIdentity<'a>,
    scope: AuthScope<'a>,
}

#[derive(Serialize)]
struct AuthIdentity<'a> {
    methods: [&'a str; 1],
    password: AuthPassword<'a>,
}

#[derive(Serialize)]
struct AuthPassword<'a> {
    user: AuthUser<'a>,
}

#[derive(Serialize)]
struct AuthUser<'a> {
    name: &'a str,
    domain: AuthDomain<'a>,
    password: &'a str,
}

#[derive(Serialize)]
struct AuthScope<'a> {
    project: AuthProject<'a>,
}

#[derive(Serialize)]
struct AuthProject<'a> {
    name: &'a str,
    domain: AuthDomain<'a>,
}

#[derive(Serialize)]
struct AuthDomain<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct TokenEnvelope {
    token: TokenPayload,
}

#[derive(Deserialize)]
struct TokenPayload {
    #[serde(default)]
    catalog: Vec<TokenCatalogEntry>,
}

#[derive(Deserialize)]
struct TokenCatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    endpoints: Vec<TokenEndpoint>,
}

#[derive(Deserialize)]
struct TokenEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    url: String,
}

/// Builds [`HttpControlPlane`] handles, performing the password grant for
/// statically configured credentials.
#[derive(Clone, Debug, Default)]
pub struct HttpControlPlaneProvider {
    http: reqwest::Client,
}

impl HttpControlPlaneProvider {
    /// Creates a provider with a fresh HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn password_grant(
        &self,
        username: &str,
        password: &str,
        project_name: &str,
        auth_url: &str,
        region: Option<&str>,
    ) -> Result<HttpControlPlane, StoreError> {
        let body = AuthRequest {
            auth: AuthPayload {
                identity: AuthIdentity {
                    methods: ["password"],
                    password: AuthPassword {
                        user: AuthUser {
                            name: username,
                            domain: AuthDomain {
                                name: IDENTITY_DOMAIN,
                            },
                            password,
                        },
                    },
                },
                scope: AuthScope {
                    project: AuthProject {
                        name: project_name,
                        domain: AuthDomain {
                            name: IDENTITY_DOMAIN,
                        },
                    },
                },
            },
        };

        let response = self
            .http
            .post(format!("{}/v3/auth/tokens", auth_url.trim_end_matches('/')))
            .json(&body)
            .send()
            .await
            .map_err(|err| StoreError::backend(format!("identity request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::backend(format!(
                "identity service rejected the static credentials (status {status}): {message}"
            )));
        }

        let token = response
            .headers()
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| {
                StoreError::backend("identity response carried no subject token")
            })?;

        let envelope: TokenEnvelope = response
            .json()
            .await
            .map_err(|err| StoreError::backend(format!("malformed identity response: {err}")))?;

        let endpoint = envelope
            .token
            .catalog
            .iter()
            .filter(|entry| {
                entry.service_type == BLOCK_STORAGE_SERVICE_TYPE
                    || entry.name == BLOCK_STORAGE_SERVICE_NAME
            })
            .flat_map(|entry| entry.endpoints.iter())
            .filter(|endpoint| endpoint.interface == "public")
            .find(|endpoint| match region {
                Some(wanted) => endpoint.region.as_deref() == Some(wanted),
                None => true,
            })
            .map(|endpoint| endpoint.url.clone())
            .ok_or_else(|| {
                StoreError::bad_configuration(
                    "the identity catalog publishes no block-storage endpoint for the \
                     configured credentials",
                )
            })?;

        Ok(HttpControlPlane::new(self.http.clone(), endpoint, token))
    }
}

impl ControlPlaneProvider for HttpControlPlaneProvider {
    type Client = HttpControlPlane;

    fn build<'a>(&'a self, session: &'a Session) -> ProviderFuture<'a, Self::Client> {
        Box::pin(async move {
            match session {
                Session::Token {
                    endpoint, token, ..
                } => Ok(HttpControlPlane::new(
                    self.http.clone(),
                    endpoint.clone(),
                    token.clone(),
                )),
                Session::Password {
                    username,
                    password,
                    project_name,
                    auth_url,
                    region,
                } => {
                    self.password_grant(
                        username,
                        password,
                        project_name,
                        auth_url,
                        region.as_deref(),
                    )
                    .await
                }
            }
        })
    }
}
