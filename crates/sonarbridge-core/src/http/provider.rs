//! The process-wide HTTP connection pool.

use std::path::Path;
use std::time::Duration;

use reqwest::{Certificate, Client, redirect};
use sonarbridge_config::{HttpConfig, Token};
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::HttpError;
use super::client::HttpClient;

/// Owns the shared `reqwest::Client` and hands out [`HttpClient`]s that use
/// its connection pool.
pub struct HttpClientProvider {
    client: Client,
    user_agent: String,
    runtime: Handle,
}

impl HttpClientProvider {
    /// Build the pool: HTTP/1.1 only, fixed User-Agent, no automatic
    /// redirects. Certificates are verified against the platform trust
    /// store (the default TLS backend) plus the configured extra bundle.
    pub fn new(config: &HttpConfig, user_agent: &str, runtime: Handle) -> Result<Self, HttpError> {
        let mut builder = Client::builder()
            .http1_only()
            .user_agent(user_agent)
            .redirect(redirect::Policy::none())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .tls_built_in_root_certs(true);

        if let Some(path) = &config.ca_bundle {
            for cert in extra_roots(path)? {
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder
            .build()
            .map_err(|e| HttpError::Tls(format!("failed to build HTTP client: {e}")))?;
        info!(user_agent, "HTTP connection pool ready");

        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            runtime,
        })
    }

    /// A client on the shared pool that sends `Authorization: Bearer` when
    /// `token` is set.
    pub fn client(&self, token: Option<&Token>) -> HttpClient {
        HttpClient::new(self.client.clone(), self.runtime.clone(), token.cloned())
    }

    /// A client on the shared pool that never sends credentials.
    pub fn anonymous(&self) -> HttpClient {
        self.client(None)
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

fn extra_roots(path: &Path) -> Result<Vec<Certificate>, HttpError> {
    let pem = std::fs::read(path)
        .map_err(|e| HttpError::Tls(format!("cannot read {}: {e}", path.display())))?;
    let certs = Certificate::from_pem_bundle(&pem)
        .map_err(|e| HttpError::Tls(format!("invalid CA bundle {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(HttpError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    debug!(path = %path.display(), count = certs.len(), "Loaded extra CA bundle");
    Ok(certs)
}
