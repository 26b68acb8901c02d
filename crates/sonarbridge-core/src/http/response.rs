//! Fully-read HTTP responses.

use std::fmt;
use std::sync::OnceLock;

type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

/// A response whose body has been read into memory.
///
/// The underlying connection is handed back to the pool as soon as the body
/// is read. A release hook, if attached, runs exactly once: on [`close`] or
/// on drop, whichever comes first.
///
/// [`close`]: HttpResponse::close
pub struct HttpResponse {
    status: u16,
    url: String,
    body: Vec<u8>,
    text: OnceLock<String>,
    release: Option<ReleaseHook>,
}

impl HttpResponse {
    pub fn new(status: u16, url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            status,
            url: url.into(),
            body,
            text: OnceLock::new(),
            release: None,
        }
    }

    /// Attach a hook run when the response is released.
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.release = Some(Box::new(hook));
        self
    }

    pub fn code(&self) -> u16 {
        self.status
    }

    /// The url the request was issued against.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The body decoded as UTF-8 (lossily), computed on first use.
    pub fn body_as_str(&self) -> &str {
        self.text
            .get_or_init(|| String::from_utf8_lossy(&self.body).into_owned())
    }

    /// Whether the status is 2xx.
    pub fn is_successful(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Release the response now.
    pub fn close(self) {
        drop(self);
    }

    fn release(&mut self) {
        if let Some(hook) = self.release.take() {
            hook();
        }
    }
}

impl Drop for HttpResponse {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("url", &self.url)
            .field("body_len", &self.body.len())
            .finish()
    }
}
