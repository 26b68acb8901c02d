//! URL construction and response classification for REST calls.

use serde::Deserialize;
use tracing::debug;

use super::ApiError;
use crate::http::{HttpClient, HttpError, HttpResponse, PendingResponse};

const CLOUD_HOST: &str = "://sonarcloud.io";
const CLOUD_API_HOST: &str = "://api.sonarcloud.io";

/// Where the API lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointParams {
    pub base_url: String,
    /// Organization key; set only for SonarQube Cloud.
    pub organization: Option<String>,
}

/// Join a base url and a relative path with exactly one slash.
pub fn concat(base_url: &str, relative_path: &str) -> String {
    let path = relative_path.strip_prefix('/').unwrap_or(relative_path);
    if base_url.ends_with('/') {
        format!("{base_url}{path}")
    } else {
        format!("{base_url}/{path}")
    }
}

/// Issues requests against the configured server and classifies failures.
#[derive(Debug, Clone)]
pub struct ServerApiHelper {
    client: HttpClient,
    endpoint: EndpointParams,
}

impl ServerApiHelper {
    pub fn new(endpoint: EndpointParams, client: HttpClient) -> Self {
        Self { client, endpoint }
    }

    pub fn organization(&self) -> Option<&str> {
        self.endpoint.organization.as_deref()
    }

    pub fn endpoint_url(&self, relative_path: &str) -> String {
        concat(&self.endpoint.base_url, relative_path)
    }

    /// The url on the `api.` subdomain for SonarQube Cloud, or the regular
    /// endpoint otherwise.
    pub fn api_subdomain_url(&self, relative_path: &str) -> String {
        if self.endpoint.organization.is_none() {
            return self.endpoint_url(relative_path);
        }
        let base = self.endpoint.base_url.replace(CLOUD_HOST, CLOUD_API_HOST);
        concat(&base, relative_path)
    }

    // ── Raw requests (no status check) ─────────────────────────────────

    pub fn raw_get_async(&self, relative_path: &str) -> PendingResponse {
        self.client.get_async(&self.endpoint_url(relative_path))
    }

    pub fn raw_get_anonymous_async(&self, relative_path: &str) -> PendingResponse {
        self.client
            .get_anonymous_async(&self.endpoint_url(relative_path))
    }

    pub fn raw_get_api_subdomain_async(&self, relative_path: &str) -> PendingResponse {
        self.client.get_async(&self.api_subdomain_url(relative_path))
    }

    pub fn raw_get(&self, relative_path: &str) -> Result<HttpResponse, HttpError> {
        self.raw_get_async(relative_path).wait()
    }

    pub fn raw_get_anonymous(&self, relative_path: &str) -> Result<HttpResponse, HttpError> {
        self.raw_get_anonymous_async(relative_path).wait()
    }

    pub fn raw_get_api_subdomain(&self, relative_path: &str) -> Result<HttpResponse, HttpError> {
        self.raw_get_api_subdomain_async(relative_path).wait()
    }

    // ── Checked requests ───────────────────────────────────────────────

    pub async fn get_async(&self, relative_path: &str) -> Result<HttpResponse, ApiError> {
        check(self.raw_get_async(relative_path).await?)
    }

    pub async fn get_anonymous_async(&self, relative_path: &str) -> Result<HttpResponse, ApiError> {
        check(self.raw_get_anonymous_async(relative_path).await?)
    }

    pub async fn get_api_subdomain_async(
        &self,
        relative_path: &str,
    ) -> Result<HttpResponse, ApiError> {
        check(self.raw_get_api_subdomain_async(relative_path).await?)
    }

    pub async fn post_async(
        &self,
        relative_path: &str,
        content_type: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<HttpResponse, ApiError> {
        let pending = self
            .client
            .post_async(&self.endpoint_url(relative_path), content_type, body);
        check(pending.await?)
    }

    pub fn get(&self, relative_path: &str) -> Result<HttpResponse, ApiError> {
        check(self.raw_get(relative_path)?)
    }

    pub fn get_anonymous(&self, relative_path: &str) -> Result<HttpResponse, ApiError> {
        check(self.raw_get_anonymous(relative_path)?)
    }

    pub fn get_api_subdomain(&self, relative_path: &str) -> Result<HttpResponse, ApiError> {
        check(self.raw_get_api_subdomain(relative_path)?)
    }

    pub fn post(
        &self,
        relative_path: &str,
        content_type: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<HttpResponse, ApiError> {
        let response = self
            .client
            .post(&self.endpoint_url(relative_path), content_type, body)?;
        check(response)
    }
}

fn check(response: HttpResponse) -> Result<HttpResponse, ApiError> {
    if response.is_successful() {
        Ok(response)
    } else {
        Err(classify(response))
    }
}

/// Turn a failed response into an [`ApiError`], releasing the response.
pub fn classify(response: HttpResponse) -> ApiError {
    let code = response.code();
    debug!(code, url = response.url(), "API request failed");

    let error = match code {
        401 => ApiError::Unauthorized,
        403 => ApiError::Forbidden(
            try_parse_json_error(response.body_as_str()).unwrap_or_else(|| "Forbidden".to_string()),
        ),
        404 => ApiError::NotFound(format!("Error {code} on {}", response.url())),
        c if c >= 500 => ApiError::ServerError(format!("Error {code} on {}", response.url())),
        _ => ApiError::Generic {
            code,
            url: response.url().to_string(),
            detail: try_parse_json_error(response.body_as_str()),
        },
    };
    response.close();
    error
}

#[derive(Deserialize)]
struct ErrorBody {
    errors: Vec<ErrorEntry>,
}

#[derive(Deserialize)]
struct ErrorEntry {
    #[serde(default)]
    msg: Option<String>,
}

/// The `errors[].msg` values joined with ", ".
///
/// `None` for a blank body, a body that is not a JSON object with an
/// `errors` array, or an array without any messages.
fn try_parse_json_error(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let messages: Vec<String> = parsed.errors.into_iter().filter_map(|e| e.msg).collect();
    if messages.is_empty() {
        None
    } else {
        Some(messages.join(", "))
    }
}
