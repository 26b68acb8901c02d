//! The engine bridge: lifecycle, handshake, and operations.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use sonarbridge_config::AppConfig;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::EngineError;
use super::languages::{PluginSet, discover_plugins};
use super::protocol::{
    AnalysisResult, AnalyzeFilesAndTrackParams, BackendCapability, ClientConstantInfo,
    ConfigurationScope, DidAddConfigurationScopesParams, DidUpdateFileSystemParams,
    FileRegistration, HttpConfiguration, InitializeParams, TelemetryConstantAttributes,
    ToolCalledParams, method,
};
use super::rpc::{RpcConnection, RpcError};
use super::transport::{Launcher, Transport};
use crate::build_info;
use crate::completion::{self, Completion, WaitError};

/// Id and name of the single synthetic configuration scope.
pub const PROJECT_ID: &str = "sonarqube-mcp-server";

const TELEMETRY_PRODUCT_KEY: &str = "mcpserver";
const TELEMETRY_IDE_VERSION: &str = "MCP";

/// Lifecycle of an [`EngineBridge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Starting,
    Ready,
    ShuttingDown,
    Stopped,
    /// The handshake failed or timed out. Terminal.
    Failed,
}

#[derive(Clone)]
enum HandleState {
    Pending,
    Resolved(Arc<RpcConnection>),
    Cancelled,
}

/// A view of the bridge's single-assignment ready cell.
#[derive(Clone)]
pub struct EngineHandle {
    rx: watch::Receiver<HandleState>,
}

impl EngineHandle {
    /// The live connection, if the handshake has completed.
    pub fn now(&self) -> Option<Arc<RpcConnection>> {
        match &*self.rx.borrow() {
            HandleState::Resolved(conn) => Some(Arc::clone(conn)),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*self.rx.borrow(), HandleState::Resolved(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(&*self.rx.borrow(), HandleState::Cancelled)
    }

    /// Wait for the connection. Never returns if the handle is cancelled.
    pub async fn resolved(mut self) -> Arc<RpcConnection> {
        loop {
            let state = self.rx.borrow_and_update().clone();
            match state {
                HandleState::Resolved(conn) => return conn,
                HandleState::Cancelled => return std::future::pending().await,
                HandleState::Pending => {
                    if self.rx.changed().await.is_err() {
                        return std::future::pending().await;
                    }
                }
            }
        }
    }
}

/// Everything the handshake needs, resolved from configuration once.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub app_name: String,
    pub app_version: String,
    pub user_agent: String,
    pub storage_root: PathBuf,
    pub work_dir: PathBuf,
    pub plugins_path: Option<PathBuf>,
    pub telemetry_enabled: bool,
    pub handshake_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig, user_agent: &str) -> Self {
        Self {
            app_name: build_info::APP_NAME.to_string(),
            app_version: build_info::VERSION.to_string(),
            user_agent: user_agent.to_string(),
            storage_root: config.engine.storage_path.clone(),
            work_dir: config.engine.resolved_work_dir(),
            plugins_path: config.engine.plugins_path.clone(),
            telemetry_enabled: config.engine.telemetry_enabled,
            handshake_timeout: config.engine.handshake_timeout(),
            shutdown_timeout: config.engine.shutdown_timeout(),
        }
    }

    /// Capabilities negotiated in `initialize`.
    pub fn capabilities(&self) -> Vec<BackendCapability> {
        let mut caps = vec![
            BackendCapability::FullSynchronization,
            BackendCapability::ProjectSynchronization,
        ];
        if self.telemetry_enabled {
            caps.push(BackendCapability::Telemetry);
        }
        caps
    }

    /// Analyzers found in the local plugins directory, if one is configured.
    pub async fn local_plugins(&self) -> PluginSet {
        let Some(dir) = &self.plugins_path else {
            return PluginSet::default();
        };
        discover_plugins(dir).await.unwrap_or_else(|e| {
            warn!(dir = %dir.display(), error = %e, "Cannot scan plugins directory");
            PluginSet::default()
        })
    }

    /// Build the `initialize` payload.
    pub fn initialize_params(&self, plugins: PluginSet) -> InitializeParams {
        InitializeParams {
            client_constant_info: ClientConstantInfo {
                name: self.app_name.clone(),
                user_agent: self.user_agent.clone(),
            },
            telemetry_constant_attributes: TelemetryConstantAttributes {
                product_key: TELEMETRY_PRODUCT_KEY.to_string(),
                product_name: self.app_name.clone(),
                product_version: self.app_version.clone(),
                ide_version: TELEMETRY_IDE_VERSION.to_string(),
                additional_attributes: Default::default(),
            },
            http_configuration: HttpConfiguration::default(),
            backend_capabilities: self.capabilities(),
            storage_root: self.storage_root.clone(),
            work_dir: self.work_dir.clone(),
            embedded_plugin_paths: plugins.paths.into_iter().collect(),
            enabled_languages_in_standalone_mode: plugins.languages.into_iter().collect(),
        }
    }
}

/// One analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSession {
    pub id: Uuid,
    pub files: Vec<Url>,
    /// Epoch milliseconds.
    pub start_time: u64,
}

impl AnalysisSession {
    /// A session with a fresh id, starting now.
    pub fn new(files: Vec<Url>) -> Self {
        let start_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            id: Uuid::new_v4(),
            files,
            start_time,
        }
    }
}

/// Owner of the engine connection.
///
/// Shared behind an `Arc`; every method takes `&self`.
pub struct EngineBridge {
    settings: EngineSettings,
    runtime: Handle,
    transport: Mutex<Option<Transport>>,
    ready: watch::Sender<HandleState>,
    state: Mutex<EngineState>,
    launcher: tokio::sync::Mutex<Option<Launcher>>,
}

impl EngineBridge {
    pub fn new(settings: EngineSettings, transport: Transport, runtime: Handle) -> Self {
        let (ready, _) = watch::channel(HandleState::Pending);
        Self {
            settings,
            runtime,
            transport: Mutex::new(Some(transport)),
            ready,
            state: Mutex::new(EngineState::NotStarted),
            launcher: tokio::sync::Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> EngineState {
        *self.lock_state()
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            rx: self.ready.subscribe(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: EngineState) {
        *self.lock_state() = next;
    }

    /// Open the transport and perform the `initialize` handshake with the
    /// analyzers from the local plugins directory.
    ///
    /// Only the first call does any work. On failure the ready handle is
    /// cancelled for the lifetime of the bridge.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.start_inner(None).await
    }

    /// Like [`start`](Self::start), with an explicit analyzer set.
    pub async fn start_with_plugins(&self, plugins: PluginSet) -> Result<(), EngineError> {
        self.start_inner(Some(plugins)).await
    }

    async fn start_inner(&self, plugins: Option<PluginSet>) -> Result<(), EngineError> {
        {
            let mut state = self.lock_state();
            match *state {
                EngineState::NotStarted => *state = EngineState::Starting,
                EngineState::Failed => {
                    return Err(EngineError::HandshakeFailure(
                        "engine failed to start earlier".to_string(),
                    ));
                }
                _ => return Ok(()),
            }
        }

        let plugins = match plugins {
            Some(plugins) => plugins,
            None => self.settings.local_plugins().await,
        };
        let conn = match self.handshake(plugins).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Engine handshake failed");
                self.fail();
                return Err(e);
            }
        };

        {
            let mut state = self.lock_state();
            if *state != EngineState::Starting {
                // Shut down while the handshake was in flight.
                conn.close();
                return Err(EngineError::Cancelled);
            }
            self.ready.send_replace(HandleState::Resolved(conn));
            *state = EngineState::Ready;
        }
        info!("Analysis engine ready");

        self.register_configuration_scope();
        Ok(())
    }

    async fn handshake(&self, plugins: PluginSet) -> Result<Arc<RpcConnection>, EngineError> {
        let transport = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(EngineError::Cancelled)?;
        debug!(?transport, "Opening engine transport");

        info!(
            plugins = plugins.paths.len(),
            languages = ?plugins.languages,
            "Initializing analysis engine"
        );
        let params = serde_json::to_value(self.settings.initialize_params(plugins))?;
        let (reader, writer, launcher) = transport.open(&self.runtime)?.into_parts();
        {
            let mut slot = self.launcher.lock().await;
            if self.state() != EngineState::Starting {
                drop(slot);
                debug!("Shut down while the transport was opening");
                if let Err(e) = launcher.close().await {
                    warn!(error = %e, "Failed to stop engine");
                }
                return Err(EngineError::Cancelled);
            }
            *slot = Some(launcher);
        }

        let conn = RpcConnection::start(&self.runtime, reader, writer);
        let timeout = self.settings.handshake_timeout;
        match tokio::time::timeout(timeout, conn.request(method::INITIALIZE, params)).await {
            Ok(Ok(_)) => Ok(conn),
            Ok(Err(e)) => Err(EngineError::HandshakeFailure(e.to_string())),
            Err(_) => Err(EngineError::HandshakeTimeout(timeout)),
        }
    }

    fn fail(&self) {
        self.cancel_pending();
        let mut state = self.lock_state();
        if *state == EngineState::Starting {
            *state = EngineState::Failed;
        }
    }

    /// Cancel the ready handle unless it already resolved. The handle is
    /// completed at most once.
    fn cancel_pending(&self) -> bool {
        self.ready.send_if_modified(|state| {
            if matches!(state, HandleState::Pending) {
                *state = HandleState::Cancelled;
                true
            } else {
                false
            }
        })
    }

    /// Run `send` against the connection once it is ready.
    ///
    /// When the handle is already resolved the frame is queued before this
    /// returns, which keeps successive calls in order.
    fn dispatch<F>(&self, op: &'static str, send: F)
    where
        F: FnOnce(&RpcConnection) -> Result<(), RpcError> + Send + 'static,
    {
        let handle = self.handle();
        if let Some(conn) = handle.now() {
            if let Err(e) = send(&conn) {
                warn!(op, error = %e, "Engine notification failed");
            }
            return;
        }
        if handle.is_cancelled() {
            debug!(op, "Engine unavailable, dropping operation");
            return;
        }
        self.runtime.spawn(async move {
            let conn = handle.resolved().await;
            if let Err(e) = send(&conn) {
                warn!(op, error = %e, "Engine notification failed");
            }
        });
    }

    fn notify<P>(&self, op: &'static str, params: &P)
    where
        P: serde::Serialize,
    {
        let params = match serde_json::to_value(params) {
            Ok(params) => params,
            Err(e) => {
                warn!(op, error = %e, "Cannot encode engine notification");
                return;
            }
        };
        self.dispatch(op, move |conn| conn.notify(op, params));
    }

    /// Declare the synthetic configuration scope.
    pub fn register_configuration_scope(&self) {
        self.notify(
            method::DID_ADD_CONFIGURATION_SCOPES,
            &DidAddConfigurationScopesParams {
                added_scopes: vec![ConfigurationScope {
                    id: PROJECT_ID.to_string(),
                    parent_id: None,
                    bindable: false,
                    name: PROJECT_ID.to_string(),
                }],
            },
        );
    }

    /// Make a file known to the engine.
    pub fn add_file(&self, registration: FileRegistration) {
        debug!(uri = %registration.uri, "Registering file");
        self.notify(
            method::DID_UPDATE_FILE_SYSTEM,
            &DidUpdateFileSystemParams {
                added_files: vec![registration],
                ..Default::default()
            },
        );
    }

    /// Forget a previously registered file.
    pub fn remove_file(&self, uri: Url) {
        debug!(%uri, "Removing file registration");
        self.notify(
            method::DID_UPDATE_FILE_SYSTEM,
            &DidUpdateFileSystemParams {
                removed_files: vec![uri],
                ..Default::default()
            },
        );
    }

    /// Report a tool invocation. Skipped when telemetry is disabled.
    pub fn notify_tool_called(&self, tool_name: &str, succeeded: bool) {
        if !self.settings.telemetry_enabled {
            return;
        }
        self.notify(
            method::TOOL_CALLED,
            &ToolCalledParams {
                tool_name: tool_name.to_string(),
                succeeded,
            },
        );
    }

    /// Analyze the session's files once the engine is ready.
    pub fn analyze(&self, session: AnalysisSession) -> AnalysisFuture {
        let handle = self.handle();
        let completion = completion::spawn(&self.runtime, async move {
            let conn = handle.resolved().await;
            debug!(analysis_id = %session.id, files = session.files.len(), "Starting analysis");
            let params = serde_json::to_value(AnalyzeFilesAndTrackParams {
                config_scope_id: PROJECT_ID.to_string(),
                analysis_id: session.id,
                files_to_analyze: session.files,
                extra_properties: Default::default(),
                should_fetch_server_issues: false,
                start_time: session.start_time,
            })?;
            let value = conn
                .request(method::ANALYZE_FILES_AND_TRACK, params)
                .await?;
            Ok::<_, EngineError>(serde_json::from_value::<AnalysisResult>(value)?)
        });
        AnalysisFuture { completion }
    }

    /// Ask the engine to shut down, then close the transport.
    ///
    /// Errors are logged. Only the first call does any work. A handle still
    /// waiting for the handshake is cancelled.
    pub async fn shutdown(&self) {
        {
            let mut state = self.lock_state();
            if matches!(*state, EngineState::ShuttingDown | EngineState::Stopped) {
                return;
            }
            *state = EngineState::ShuttingDown;
        }

        if let Some(conn) = self.handle().now() {
            let timeout = self.settings.shutdown_timeout;
            match tokio::time::timeout(timeout, conn.request(method::SHUTDOWN, Value::Null)).await {
                Ok(Ok(_)) => debug!("Engine acknowledged shutdown"),
                Ok(Err(e)) => warn!(error = %e, "Engine shutdown request failed"),
                Err(_) => warn!(?timeout, "Engine did not acknowledge shutdown in time"),
            }
            conn.close();
        }
        // A resolved handle keeps its closed connection, so later requests
        // fail with `ConnectionClosed`.
        self.cancel_pending();

        if let Some(launcher) = self.launcher.lock().await.take() {
            if let Err(e) = launcher.close().await {
                warn!(error = %e, "Failed to stop engine");
            }
        }
        self.set_state(EngineState::Stopped);
        info!("Analysis engine stopped");
    }
}

/// Pending result of [`EngineBridge::analyze`].
///
/// Dropping it detaches; [`cancel`](Self::cancel) aborts the request task.
pub struct AnalysisFuture {
    completion: Completion<Result<AnalysisResult, EngineError>>,
}

impl AnalysisFuture {
    pub fn cancel(&self) -> bool {
        self.completion.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.completion.is_cancelled()
    }

    /// Block the current thread until the analysis finishes.
    pub fn wait(self) -> Result<AnalysisResult, EngineError> {
        flatten(self.completion.wait())
    }

    /// Block for at most `timeout`; on expiry the analysis is cancelled.
    pub fn wait_timeout(self, timeout: Duration) -> Result<AnalysisResult, EngineError> {
        flatten(self.completion.wait_timeout(timeout))
    }

    /// Await for at most `timeout`; on expiry the analysis is cancelled.
    pub async fn with_timeout(mut self, timeout: Duration) -> Result<AnalysisResult, EngineError> {
        match tokio::time::timeout(timeout, &mut self).await {
            Ok(result) => result,
            Err(_) => {
                self.cancel();
                Err(EngineError::AnalysisTimeout(timeout))
            }
        }
    }
}

fn flatten(
    result: Result<Result<AnalysisResult, EngineError>, WaitError>,
) -> Result<AnalysisResult, EngineError> {
    match result {
        Ok(inner) => inner,
        Err(WaitError::Cancelled) => Err(EngineError::Cancelled),
        Err(WaitError::TimedOut(d)) => Err(EngineError::AnalysisTimeout(d)),
    }
}

impl Future for AnalysisFuture {
    type Output = Result<AnalysisResult, EngineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.completion).poll(cx).map(flatten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn settings(telemetry_enabled: bool) -> EngineSettings {
        EngineSettings {
            app_name: "SonarQube MCP Server".to_string(),
            app_version: "1.2.3".to_string(),
            user_agent: "SonarQube MCP Server 1.2.3".to_string(),
            storage_root: PathBuf::from("/data/storage"),
            work_dir: PathBuf::from("/data/work"),
            plugins_path: None,
            telemetry_enabled,
            handshake_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_capabilities_follow_telemetry_flag() {
        assert_eq!(
            settings(true).capabilities(),
            vec![
                BackendCapability::FullSynchronization,
                BackendCapability::ProjectSynchronization,
                BackendCapability::Telemetry,
            ]
        );
        assert!(
            !settings(false)
                .capabilities()
                .contains(&BackendCapability::Telemetry)
        );
    }

    #[test]
    fn test_initialize_params_identity() {
        let params = settings(true).initialize_params(PluginSet::default());
        assert_eq!(params.client_constant_info.name, "SonarQube MCP Server");
        assert_eq!(params.telemetry_constant_attributes.product_key, "mcpserver");
        assert_eq!(params.telemetry_constant_attributes.ide_version, "MCP");
        assert_eq!(params.telemetry_constant_attributes.product_version, "1.2.3");
        assert!(params.embedded_plugin_paths.is_empty());
        assert_eq!(params.storage_root, PathBuf::from("/data/storage"));
    }

    #[tokio::test]
    async fn test_initialize_params_include_discovered_plugins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sonar-go-plugin-1.0.jar"), b"").unwrap();
        let mut settings = settings(false);
        settings.plugins_path = Some(dir.path().to_path_buf());

        let params = settings.initialize_params(settings.local_plugins().await);
        assert_eq!(params.embedded_plugin_paths.len(), 1);
        assert_eq!(
            params.enabled_languages_in_standalone_mode,
            vec![crate::engine::Language::Go]
        );
    }

    #[test]
    fn test_session_ids_are_fresh() {
        let a = AnalysisSession::new(vec![]);
        let b = AnalysisSession::new(vec![]);
        assert_ne!(a.id, b.id);
        assert!(a.start_time > 0);
    }

    #[tokio::test]
    async fn test_handle_starts_pending() {
        let bridge = EngineBridge::new(
            settings(false),
            Transport::Process {
                command: "unused".to_string(),
                args: vec![],
            },
            Handle::current(),
        );
        let handle = bridge.handle();
        assert!(!handle.is_resolved());
        assert!(!handle.is_cancelled());
        assert_eq!(bridge.state(), EngineState::NotStarted);

        bridge.shutdown().await;
        assert!(handle.is_cancelled());
        assert_eq!(bridge.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_handshake_after_shutdown_releases_launcher() {
        let bridge = EngineBridge::new(
            settings(false),
            Transport::Process {
                command: "cat".to_string(),
                args: vec![],
            },
            Handle::current(),
        );
        // Shutdown won the race: the state moved on before the transport
        // finished opening.
        bridge.set_state(EngineState::Stopped);

        let err = bridge.handshake(PluginSet::default()).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled), "got {err:?}");
        assert!(bridge.launcher.lock().await.is_none());
        assert_eq!(bridge.state(), EngineState::Stopped);
    }
}
