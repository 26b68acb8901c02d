//! `api/plugins/*` endpoints.

use serde::Deserialize;

use super::{ApiError, ServerApiHelper, parse_json};
use crate::http::HttpResponse;

pub const INSTALLED_PLUGINS_PATH: &str = "/api/plugins/installed";
pub const DOWNLOAD_PLUGINS_PATH: &str = "/api/plugins/download";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPlugin {
    pub key: String,
    /// Jar file name on the server.
    pub filename: String,
    /// Whether the plugin is usable by the local analysis engine.
    #[serde(default)]
    pub sonar_lint_supported: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InstalledPluginsResponse {
    #[serde(default)]
    pub plugins: Vec<InstalledPlugin>,
}

/// Installed server plugins and their jars.
pub struct PluginsApi {
    helper: ServerApiHelper,
}

impl PluginsApi {
    pub fn new(helper: ServerApiHelper) -> Self {
        Self { helper }
    }

    pub async fn installed(&self) -> Result<InstalledPluginsResponse, ApiError> {
        parse_json(self.helper.get_async(INSTALLED_PLUGINS_PATH).await?)
    }

    /// Fetch the jar of plugin `key`.
    pub async fn download(&self, key: &str) -> Result<HttpResponse, ApiError> {
        self.helper
            .get_async(&format!("{DOWNLOAD_PLUGINS_PATH}?plugin={key}"))
            .await
    }

    pub fn installed_blocking(&self) -> Result<InstalledPluginsResponse, ApiError> {
        parse_json(self.helper.get(INSTALLED_PLUGINS_PATH)?)
    }
}
