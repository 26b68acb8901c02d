//! Bridge context test helpers.
//!
//! Helpers for constructing [`BridgeContext`] instances backed by a
//! [`StubEngine`], a [`MockWebServer`] standing in for the code-quality
//! server, and a temporary work directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sonarbridge_config::AppConfig;
use sonarbridge_core::BridgeContext;
use tempfile::TempDir;

use serde_json::json;

use crate::config::TestConfigBuilder;
use crate::engine::StubEngine;
use crate::web::{MockResponse, MockWebServer};

/// Server version the default mock server reports.
pub const SERVER_VERSION: &str = "2025.1.0.102418";

/// A test-scoped context with an owned temp directory.
///
/// The work and storage directories live under the temp directory, which is
/// deleted when this value is dropped. The server url points at `server`,
/// which answers `api/system/status` with [`SERVER_VERSION`] and lists no
/// installed plugins until a test registers other routes.
pub struct TestContext {
    pub context: BridgeContext,
    pub engine: Arc<StubEngine>,
    pub server: MockWebServer,
    pub config: AppConfig,
    temp_dir: TempDir,
}

impl TestContext {
    /// Build a context over `stub`, starting from `builder`.
    pub async fn new(builder: TestConfigBuilder, stub: StubEngine) -> Self {
        let server = MockWebServer::start().await;
        server.get(
            "/api/system/status",
            MockResponse::json(
                200,
                json!({"id": "20250101", "version": SERVER_VERSION, "status": "UP"}),
            ),
        );
        server.get(
            "/api/plugins/installed",
            MockResponse::json(200, json!({"plugins": []})),
        );

        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = builder
            .server_url(&server.url())
            .work_dir(&temp_dir.path().join("work"))
            .storage_path(&temp_dir.path().join("storage"))
            .build();

        let (engine, service) = stub.into_service();
        let context = BridgeContext::new(
            config.clone(),
            tokio::runtime::Handle::current(),
            Some(service),
        )
        .expect("failed to build bridge context");

        Self {
            context,
            engine,
            server,
            config,
            temp_dir,
        }
    }

    /// A context with the default test config.
    pub async fn with_stub(stub: StubEngine) -> Self {
        Self::new(TestConfigBuilder::new(), stub).await
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn work_dir(&self) -> PathBuf {
        self.context.work_dir()
    }

    /// Write `content` to a file under the temp directory.
    pub async fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        tokio::fs::write(&path, content)
            .await
            .expect("failed to write test file");
        path
    }
}
