//! Process-wide owner of the engine bridge and the HTTP pool.
//!
//! Constructed once at startup and passed by reference to every call site;
//! nothing in this crate reaches for a global.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sonarbridge_config::AppConfig;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::api::{ApiError, ServerApi};
use crate::build_info;
use crate::engine::{
    AnalysisResult, EngineBridge, EngineError, EngineService, EngineSettings, EngineState,
    Language, Transport, TransportError, analyze_snippet,
};
use crate::http::{HttpClientProvider, HttpError};
use crate::plugins::{PluginSyncError, PluginsSynchronizer};

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("HTTP setup failed: {0}")]
    Http(#[from] HttpError),

    #[error("engine transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// Why [`BridgeContext::start`] failed.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Server(#[from] ApiError),

    #[error(transparent)]
    Plugins(#[from] PluginSyncError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Everything a tool handler needs.
pub struct BridgeContext {
    config: AppConfig,
    runtime: Handle,
    engine: Arc<EngineBridge>,
    http: Arc<HttpClientProvider>,
    server_api: ServerApi,
    shutdown_tx: broadcast::Sender<()>,
}

impl BridgeContext {
    /// Build the context. `embedded` serves the loopback transport and is
    /// ignored for the process transport.
    pub fn new(
        config: AppConfig,
        runtime: Handle,
        embedded: Option<Arc<dyn EngineService>>,
    ) -> Result<Self, ContextError> {
        let user_agent = config
            .http
            .user_agent
            .clone()
            .unwrap_or_else(build_info::default_user_agent);

        let http = Arc::new(HttpClientProvider::new(
            &config.http,
            &user_agent,
            runtime.clone(),
        )?);
        let server_api = ServerApi::from_config(&config.server, &http);

        let transport = Transport::from_config(&config.engine, embedded)?;
        let engine = Arc::new(EngineBridge::new(
            EngineSettings::from_config(&config, &user_agent),
            transport,
            runtime.clone(),
        ));

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            config,
            runtime,
            engine,
            http,
            server_api,
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn engine(&self) -> &Arc<EngineBridge> {
        &self.engine
    }

    pub fn http(&self) -> &Arc<HttpClientProvider> {
        &self.http
    }

    pub fn server_api(&self) -> &ServerApi {
        &self.server_api
    }

    pub fn work_dir(&self) -> PathBuf {
        self.config.engine.resolved_work_dir()
    }

    pub fn analysis_timeout(&self) -> Duration {
        self.config.engine.analysis_timeout()
    }

    pub fn plugins_synchronizer(&self) -> PluginsSynchronizer {
        PluginsSynchronizer::new(self.server_api.plugins(), &self.config.engine.storage_path)
    }

    /// Check the server version, gather the analyzers, and start the engine.
    ///
    /// Analyzers come from `engine.plugins_path` when it is set, otherwise
    /// they are synchronized from the server. Once the engine has been
    /// started this defers to [`EngineBridge::start`].
    pub async fn start(&self) -> Result<(), StartupError> {
        if self.engine.state() != EngineState::NotStarted {
            return Ok(self.engine.start().await?);
        }
        info!(
            server = %self.config.server.url,
            transport = ?self.config.engine.transport,
            "Starting bridges"
        );

        self.server_api.ensure_supported_version().await?;
        let plugins = match &self.config.engine.plugins_path {
            Some(_) => self.engine.settings().local_plugins().await,
            None => self.plugins_synchronizer().synchronize().await?,
        };
        Ok(self.engine.start_with_plugins(plugins).await?)
    }

    /// Analyze a snippet with the configured work dir and timeout.
    pub async fn analyze_snippet(
        &self,
        content: &str,
        language: Option<Language>,
    ) -> Result<AnalysisResult, EngineError> {
        analyze_snippet(
            &self.engine,
            &self.work_dir(),
            content,
            language,
            self.analysis_timeout(),
        )
        .await
    }

    /// Ask [`run_until_shutdown`](Self::run_until_shutdown) to return.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for [`request_shutdown`](Self::request_shutdown) or Ctrl-C, then
    /// shut the engine down.
    pub async fn run_until_shutdown(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutdown requested");
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl-C received, shutting down");
            }
        }
        self.shutdown().await;
    }

    /// Shut the engine down. Idempotent.
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}
