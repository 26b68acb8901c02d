#![deny(unsafe_code)]

//! Configuration loading and validation for sonarbridge.
//!
//! Loads TOML configuration files and validates them against expected schemas.
//! Provides the [`AppConfig`] type as the central configuration structure.
//! Values for the server connection and engine storage can additionally be
//! overridden from the process environment via [`AppConfig::apply_env`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Default SonarQube Cloud base URL.
pub const SONARQUBE_CLOUD_URL: &str = "https://sonarcloud.io";

/// Environment variable names understood by [`AppConfig::apply_env`].
pub mod env {
    pub const STORAGE_PATH: &str = "STORAGE_PATH";
    pub const SONARQUBE_CLOUD_URL: &str = "SONARQUBE_CLOUD_URL";
    pub const SONARQUBE_URL: &str = "SONARQUBE_URL";
    pub const SONARQUBE_ORG: &str = "SONARQUBE_ORG";
    pub const SONARQUBE_TOKEN: &str = "SONARQUBE_TOKEN";
    pub const TELEMETRY_DISABLED: &str = "TELEMETRY_DISABLED";
}

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote code-quality server connection.
    #[serde(default)]
    pub server: ServerConfig,

    /// Local analysis engine.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Shared HTTP connection pool.
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A bearer token read from configuration.
///
/// Redacted in `Debug` output and zeroized on drop. Serializes as the plain
/// value; never log a serialized config.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the raw token value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token([REDACTED])")
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Connection settings for the SonarQube Server / Cloud REST API.
///
/// ## TOML Example
///
/// ```toml
/// [server]
/// url = "https://sonarcloud.io"
/// organization = "my-org"
/// token = "squ_..."
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the server.
    #[serde(default = "default_cloud_url")]
    pub url: String,

    /// URL that identifies SonarQube Cloud. When `url` equals this value the
    /// deployment is treated as Cloud and an organization is required.
    #[serde(default = "default_cloud_url")]
    pub cloud_url: String,

    /// Organization key (SonarQube Cloud only).
    #[serde(default)]
    pub organization: Option<String>,

    /// User token sent as `Authorization: Bearer <token>`. When absent,
    /// requests are sent without credentials.
    #[serde(default)]
    pub token: Option<Token>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_cloud_url(),
            cloud_url: default_cloud_url(),
            organization: None,
            token: None,
        }
    }
}

impl ServerConfig {
    /// Whether the configured server is SonarQube Cloud.
    pub fn is_cloud(&self) -> bool {
        self.url == self.cloud_url
    }
}

fn default_cloud_url() -> String {
    SONARQUBE_CLOUD_URL.to_string()
}

/// How the analysis engine is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineTransportKind {
    /// In-process engine served over a loopback byte channel.
    #[default]
    Loopback,
    /// External engine process spoken to over its stdin/stdout.
    Process,
}

/// Analysis engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Transport used to reach the engine.
    #[serde(default)]
    pub transport: EngineTransportKind,

    /// Engine executable (process transport only).
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments passed to `command`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Directory where the engine keeps its storage.
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Directory scanned for analyzer plugin jars. When unset, analyzers are
    /// downloaded from the server into `<storage_path>/plugins` at startup.
    #[serde(default)]
    pub plugins_path: Option<PathBuf>,

    /// Working directory handed to the engine. Temporary analysis files are
    /// written here. Defaults to `~/.sonarlint`.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Whether the telemetry capability is negotiated.
    #[serde(default = "default_true")]
    pub telemetry_enabled: bool,

    /// Bounded wait for the `initialize` handshake.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    /// Bounded wait for the `shutdown` call.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Bounded wait applied by callers to a single analysis.
    #[serde(default = "default_analysis_timeout_secs")]
    pub analysis_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transport: EngineTransportKind::default(),
            command: None,
            args: Vec::new(),
            storage_path: default_storage_path(),
            plugins_path: None,
            work_dir: None,
            telemetry_enabled: true,
            handshake_timeout_secs: default_handshake_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            analysis_timeout_secs: default_analysis_timeout_secs(),
        }
    }
}

impl EngineConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    /// The effective work directory.
    pub fn resolved_work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| self.storage_path.clone())
                .join(".sonarlint")
        })
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/storage")
}

fn default_true() -> bool {
    true
}

fn default_handshake_timeout_secs() -> u64 {
    60
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_analysis_timeout_secs() -> u64 {
    30
}

/// Shared HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Overrides the default `"<app name> <version>"` User-Agent.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Maximum idle connections kept per host.
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Extra PEM bundle added to the trust store.
    #[serde(default)]
    pub ca_bundle: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            ca_bundle: None,
        }
    }
}

fn default_pool_max_idle_per_host() -> usize {
    8
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    60
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read(path).await?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file without validating it, for callers that overlay the
    /// environment before validation.
    pub async fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&content)?)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from an environment map. Blank values are ignored.
    ///
    /// Call [`validate`](Self::validate) afterwards; the overlay itself does
    /// not check consistency.
    pub fn apply_env(&mut self, vars: &HashMap<String, String>) {
        let get = |name: &str| {
            vars.get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        if let Some(path) = get(env::STORAGE_PATH) {
            self.engine.storage_path = PathBuf::from(path);
        }
        if let Some(cloud_url) = get(env::SONARQUBE_CLOUD_URL) {
            // Keep url pointing at Cloud unless it was set explicitly.
            if self.server.is_cloud() {
                self.server.url = cloud_url.clone();
            }
            self.server.cloud_url = cloud_url;
        }
        if let Some(url) = get(env::SONARQUBE_URL) {
            self.server.url = url;
        }
        if let Some(org) = get(env::SONARQUBE_ORG) {
            self.server.organization = Some(org);
        }
        if let Some(token) = get(env::SONARQUBE_TOKEN) {
            self.server.token = Some(Token::new(token));
        }
        if let Some(disabled) = get(env::TELEMETRY_DISABLED) {
            self.engine.telemetry_enabled = !disabled.eq_ignore_ascii_case("true");
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.url must not be empty".to_string(),
            ));
        }
        if !self.server.url.starts_with("http://") && !self.server.url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "server.url must be an http(s) URL, got {:?}",
                self.server.url
            )));
        }
        if self.server.is_cloud()
            && self
                .server
                .organization
                .as_deref()
                .is_none_or(|org| org.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "server.organization must be set when using SonarQube Cloud".to_string(),
            ));
        }
        if self.server.token.as_ref().is_some_and(Token::is_blank) {
            return Err(ConfigError::Validation(
                "server.token must not be blank when set".to_string(),
            ));
        }

        if self.engine.transport == EngineTransportKind::Process
            && self
                .engine
                .command
                .as_deref()
                .is_none_or(|cmd| cmd.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "engine.command is required when engine.transport is \"process\"".to_string(),
            ));
        }
        if self.engine.handshake_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "engine.handshake_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.engine.shutdown_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "engine.shutdown_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.engine.analysis_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "engine.analysis_timeout_secs must be non-zero".to_string(),
            ));
        }

        if self.http.pool_max_idle_per_host == 0 {
            return Err(ConfigError::Validation(
                "http.pool_max_idle_per_host must be at least 1".to_string(),
            ));
        }
        if self.http.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "http.request_timeout_secs must be non-zero".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}
