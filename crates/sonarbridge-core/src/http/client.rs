//! Completion-handle HTTP client with bearer-token injection.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use reqwest::Client;
use sonarbridge_config::Token;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

use super::HttpError;
use super::redirect::{RequestSpec, send_following};
use super::response::HttpResponse;
use crate::completion::{self, Completion};

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// A view of the shared pool, optionally carrying a bearer token.
///
/// Cheap to clone. The `_async` methods return immediately with a
/// [`PendingResponse`]; the plain ones block the calling thread and must not
/// be used from inside an async task.
#[derive(Clone)]
pub struct HttpClient {
    inner: Client,
    runtime: Handle,
    token: Option<Token>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    pub(crate) fn new(inner: Client, runtime: Handle, token: Option<Token>) -> Self {
        Self {
            inner,
            runtime,
            token,
        }
    }

    /// Whether requests carry `Authorization: Bearer`.
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn get_async(&self, url: &str) -> PendingResponse {
        self.execute(RequestSpec::get(url), self.token.clone())
    }

    /// GET without credentials, even if this client has a token.
    pub fn get_anonymous_async(&self, url: &str) -> PendingResponse {
        self.execute(RequestSpec::get(url), None)
    }

    pub fn post_async(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<Vec<u8>>,
    ) -> PendingResponse {
        self.execute(
            RequestSpec::post(url, content_type, body.into()),
            self.token.clone(),
        )
    }

    pub fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.get_async(url).wait()
    }

    pub fn get_anonymous(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.get_anonymous_async(url).wait()
    }

    pub fn post(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<HttpResponse, HttpError> {
        self.post_async(url, content_type, body).wait()
    }

    fn execute(&self, spec: RequestSpec, token: Option<Token>) -> PendingResponse {
        debug!(
            method = %spec.method,
            url = %spec.url,
            authenticated = token.is_some(),
            "HTTP request"
        );
        let client = self.inner.clone();
        let url = spec.url.clone();
        let completion = completion::spawn(&self.runtime, async move {
            send_following(&client, &spec, token.as_ref().map(Token::expose)).await
        });
        PendingResponse { url, completion }
    }
}

/// An in-flight request.
///
/// Dropping it detaches from the request; [`cancel`](Self::cancel) aborts
/// the task that drives it.
pub struct PendingResponse {
    url: String,
    completion: Completion<Result<HttpResponse, HttpError>>,
}

impl PendingResponse {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Abort the request. Returns false if it had already completed.
    pub fn cancel(&self) -> bool {
        let cancelled = self.completion.cancel();
        if cancelled {
            debug!(url = %self.url, "HTTP request cancelled");
        }
        cancelled
    }

    pub fn is_cancelled(&self) -> bool {
        self.completion.is_cancelled()
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    /// The abort handle of the task driving the request.
    pub fn native_handle(&self) -> Option<&AbortHandle> {
        self.completion.native_handle()
    }

    /// Block until the response arrives.
    pub fn wait(self) -> Result<HttpResponse, HttpError> {
        self.completion.wait()?
    }

    /// Block for at most `timeout`; on expiry the request is cancelled.
    pub fn wait_timeout(self, timeout: Duration) -> Result<HttpResponse, HttpError> {
        self.completion.wait_timeout(timeout)?
    }
}

impl Future for PendingResponse {
    type Output = Result<HttpResponse, HttpError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.completion)
            .poll(cx)
            .map(|result| result.map_err(HttpError::from).and_then(|inner| inner))
    }
}
