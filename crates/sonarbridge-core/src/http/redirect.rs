//! Request execution with manual redirect handling.
//!
//! The pooled client has automatic redirects disabled. Redirects are followed
//! here so that a POST answered with 301/302/303 is re-sent as a POST with
//! its body intact, and so that credentials never leave the original host.

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Client, Method, StatusCode};
use tracing::debug;
use url::Url;

use super::HttpError;
use super::response::HttpResponse;

/// Maximum redirects followed for one request.
pub const MAX_REDIRECTS: usize = 10;

/// Everything needed to (re-)issue a request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub content_type: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            content_type: None,
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            content_type: Some(content_type.into()),
            body: Some(body),
        }
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn same_authority(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

/// Send `spec`, following redirects with the original method and body.
///
/// The bearer token is attached to the first hop and to any later hop on the
/// same host and port. The returned response carries the original url.
pub async fn send_following(
    client: &Client,
    spec: &RequestSpec,
    token: Option<&str>,
) -> Result<HttpResponse, HttpError> {
    let original = Url::parse(&spec.url).map_err(|e| HttpError::InvalidUrl {
        url: spec.url.clone(),
        reason: e.to_string(),
    })?;
    let mut target = original.clone();

    for _ in 0..=MAX_REDIRECTS {
        let mut builder = client.request(spec.method.clone(), target.clone());
        if let Some(token) = token.filter(|_| same_authority(&original, &target)) {
            builder = builder.bearer_auth(token);
        }
        if let Some(content_type) = &spec.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if let Some(body) = &spec.body {
            builder = builder.body(body.clone());
        }

        let resp = builder.send().await.map_err(HttpError::from_reqwest)?;
        let status = resp.status();

        if is_redirect(status) {
            let next = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| target.join(loc).ok());
            if let Some(next) = next {
                // Read the body so the connection goes back to the pool.
                let _ = resp.bytes().await;
                debug!(
                    method = %spec.method,
                    status = status.as_u16(),
                    from = %target,
                    to = %next,
                    "Following redirect"
                );
                target = next;
                continue;
            }
        }

        let body = resp.bytes().await.map_err(HttpError::from_reqwest)?;
        return Ok(HttpResponse::new(
            status.as_u16(),
            spec.url.clone(),
            body.to_vec(),
        ));
    }

    Err(HttpError::TooManyRedirects(MAX_REDIRECTS))
}
