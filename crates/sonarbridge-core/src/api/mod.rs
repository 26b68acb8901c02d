//! REST API access for the code-quality server.
//!
//! [`ServerApiHelper`] builds endpoint URLs and turns non-2xx responses into
//! [`ApiError`]s; typed endpoint groups such as [`SystemApi`] and
//! [`PluginsApi`] sit on top of it and are reached through the [`ServerApi`]
//! facade.

pub mod helper;
pub mod plugins;
pub mod system;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use sonarbridge_config::ServerConfig;

use crate::http::{HttpClientProvider, HttpError, HttpResponse};

pub use helper::{EndpointParams, ServerApiHelper};
pub use plugins::{InstalledPlugin, InstalledPluginsResponse, PluginsApi};
pub use system::{HealthResponse, StatusResponse, SystemApi, Version};

/// Message carried by [`ApiError::Unauthorized`].
pub const UNAUTHORIZED_MESSAGE: &str = "Not authorized. Please check server credentials.";

/// Classification of a failed API call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not authorized. Please check server credentials.")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ServerError(String),

    #[error("Error {code} on {url}{}", detail_suffix(.detail))]
    Generic {
        code: u16,
        url: String,
        detail: Option<String>,
    },

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error(
        "SonarQube server version {0} is not supported, minimal version is SQS 2025.1 or SQCB 25.1"
    )]
    UnsupportedVersion(String),
}

/// Oldest self-hosted server version accepted at startup. No release carries
/// this number; it sits below both SonarQube Server 2025.1 and Community
/// Build 25.1.
pub const MINIMUM_SERVER_VERSION: &str = "10.9";

/// Decode a JSON body, naming the url on failure.
pub(crate) fn parse_json<T: DeserializeOwned>(response: HttpResponse) -> Result<T, ApiError> {
    serde_json::from_slice(response.body())
        .map_err(|e| ApiError::Parse(format!("{}: {e}", response.url())))
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!(": {detail}"),
        None => String::new(),
    }
}

/// Entry point to the typed endpoint groups.
#[derive(Clone)]
pub struct ServerApi {
    helper: ServerApiHelper,
    authenticated: bool,
}

impl ServerApi {
    pub fn new(helper: ServerApiHelper, authenticated: bool) -> Self {
        Self {
            helper,
            authenticated,
        }
    }

    /// Build the facade for `config` on the shared pool.
    pub fn from_config(config: &ServerConfig, provider: &Arc<HttpClientProvider>) -> Self {
        let client = provider.client(config.token.as_ref());
        let helper = ServerApiHelper::new(
            EndpointParams {
                base_url: config.url.clone(),
                organization: config.organization.clone().filter(|_| config.is_cloud()),
            },
            client,
        );
        Self::new(helper, config.token.is_some())
    }

    pub fn helper(&self) -> &ServerApiHelper {
        &self.helper
    }

    pub fn system(&self) -> SystemApi {
        SystemApi::new(self.helper.clone())
    }

    pub fn plugins(&self) -> PluginsApi {
        PluginsApi::new(self.helper.clone())
    }

    /// Whether the server is SonarQube Cloud.
    pub fn is_cloud(&self) -> bool {
        self.helper.organization().is_some()
    }

    /// Fail unless a self-hosted server is at least
    /// [`MINIMUM_SERVER_VERSION`]. Cloud is always current and not asked.
    pub async fn ensure_supported_version(&self) -> Result<(), ApiError> {
        if self.is_cloud() {
            return Ok(());
        }
        let status = self.system().status().await?;
        let minimum = Version::parse(MINIMUM_SERVER_VERSION)?;
        if status.parsed_version()?.satisfies_min_requirement(&minimum) {
            Ok(())
        } else {
            Err(ApiError::UnsupportedVersion(status.version))
        }
    }

    /// Whether a token was configured.
    pub fn is_authentication_set(&self) -> bool {
        self.authenticated
    }
}
