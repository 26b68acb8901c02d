//! Configuration builders for tests.
//!
//! [`TestConfigBuilder`] starts from a configuration that validates without
//! any network or filesystem setup: a self-hosted server url, the loopback
//! engine transport, and short timeouts.

use std::path::Path;

use sonarbridge_config::{AppConfig, EngineTransportKind, Token};

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .server_url(&server.url())
///     .token("squ_test")
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.server.url = "http://127.0.0.1:9000".to_string();
        config.engine.transport = EngineTransportKind::Loopback;
        config.engine.handshake_timeout_secs = 2;
        config.engine.shutdown_timeout_secs = 1;
        config.engine.analysis_timeout_secs = 2;
        config.http.connect_timeout_secs = 2;
        config.http.request_timeout_secs = 10;
        Self { config }
    }

    pub fn server_url(mut self, url: &str) -> Self {
        self.config.server.url = url.to_string();
        self
    }

    pub fn organization(mut self, org: &str) -> Self {
        self.config.server.organization = Some(org.to_string());
        self
    }

    pub fn token(mut self, token: &str) -> Self {
        self.config.server.token = Some(Token::new(token));
        self
    }

    pub fn work_dir(mut self, dir: &Path) -> Self {
        self.config.engine.work_dir = Some(dir.to_path_buf());
        self
    }

    pub fn storage_path(mut self, dir: &Path) -> Self {
        self.config.engine.storage_path = dir.to_path_buf();
        self
    }

    pub fn plugins_path(mut self, dir: &Path) -> Self {
        self.config.engine.plugins_path = Some(dir.to_path_buf());
        self
    }

    pub fn telemetry_enabled(mut self, enabled: bool) -> Self {
        self.config.engine.telemetry_enabled = enabled;
        self
    }

    pub fn process_engine(mut self, command: &str, args: &[&str]) -> Self {
        self.config.engine.transport = EngineTransportKind::Process;
        self.config.engine.command = Some(command.to_string());
        self.config.engine.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn handshake_timeout_secs(mut self, secs: u64) -> Self {
        self.config.engine.handshake_timeout_secs = secs;
        self
    }

    pub fn analysis_timeout_secs(mut self, secs: u64) -> Self {
        self.config.engine.analysis_timeout_secs = secs;
        self
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.config.http.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
