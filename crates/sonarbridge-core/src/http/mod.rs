//! Pooled HTTP client bridge.
//!
//! ```text
//! ┌────────────┐  get/post   ┌────────────┐  spawn   ┌────────────────┐
//! │ HttpClient │────────────▶│ Completion │◀─────────│ reqwest future │
//! │ (+ token)  │             │ + abort    │  fills   │ (pooled conn)  │
//! └────────────┘             └────────────┘          └────────────────┘
//! ```
//!
//! [`HttpClientProvider`] owns the single pooled `reqwest::Client`; each
//! [`HttpClient`] it hands out shares that pool and optionally injects a
//! bearer token. Every request is spawned onto the runtime and surfaced as a
//! [`PendingResponse`], which can be awaited, waited on from a blocking
//! thread, or cancelled.

pub mod client;
pub mod provider;
pub mod redirect;
pub mod response;

pub use client::{HttpClient, JSON_CONTENT_TYPE, PendingResponse};
pub use provider::HttpClientProvider;
pub use response::HttpResponse;

/// Errors from the HTTP bridge.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("request was cancelled")]
    Cancelled,

    #[error("too many redirects (gave up after {0})")]
    TooManyRedirects(usize),

    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

impl HttpError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HttpError::Timeout
        } else if err.is_connect() {
            HttpError::Connect(err.to_string())
        } else if err.is_builder() {
            HttpError::InvalidUrl {
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                reason: err.to_string(),
            }
        } else {
            HttpError::Request(err.to_string())
        }
    }
}

impl From<crate::completion::WaitError> for HttpError {
    fn from(err: crate::completion::WaitError) -> Self {
        match err {
            crate::completion::WaitError::Cancelled => HttpError::Cancelled,
            crate::completion::WaitError::TimedOut(_) => HttpError::Timeout,
        }
    }
}
