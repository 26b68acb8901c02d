//! Startup: server version gate and analyzer plugin synchronization.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use sonarbridge_config::{ServerConfig, Token};
use sonarbridge_core::StartupError;
use sonarbridge_core::api::{ApiError, ServerApi};
use sonarbridge_core::engine::bridge::EngineState;
use sonarbridge_core::engine::protocol::method;
use sonarbridge_core::engine::Language;
use sonarbridge_core::http::HttpClientProvider;
use sonarbridge_core::plugins::{PluginSyncError, PluginsSynchronizer};
use sonarbridge_test_utils::{
    MockResponse, MockWebServer, StubEngine, TestConfigBuilder, TestContext,
};
use tokio::runtime::Handle;

const PYTHON_JAR: &str = "sonar-python-plugin-4.1.0.jar";
const TEXT_JAR: &str = "sonar-text-plugin-2.3.jar";

fn server_api(server: &ServerConfig) -> ServerApi {
    let config = TestConfigBuilder::new().build();
    let provider = Arc::new(
        HttpClientProvider::new(&config.http, "sonarbridge-test", Handle::current()).unwrap(),
    );
    ServerApi::from_config(server, &provider)
}

fn self_hosted(url: &str) -> ServerConfig {
    ServerConfig {
        url: url.to_string(),
        token: Some(Token::new("squ_t")),
        ..ServerConfig::default()
    }
}

fn installed(plugins: serde_json::Value) -> MockResponse {
    MockResponse::json(200, json!({ "plugins": plugins }))
}

async fn read(path: &Path) -> String {
    tokio::fs::read_to_string(path).await.unwrap()
}

#[test_log::test(tokio::test)]
async fn test_sync_downloads_missing_and_removes_unknown() {
    let server = MockWebServer::start().await;
    server.get(
        "/api/plugins/installed",
        installed(json!([
            {"key": "python", "filename": PYTHON_JAR, "sonarLintSupported": true},
            {"key": "text", "filename": TEXT_JAR, "sonarLintSupported": true},
            {"key": "scmgit", "filename": "sonar-scm-git-plugin-2.0.jar", "sonarLintSupported": false},
        ])),
    );
    server.get(
        "/api/plugins/download?plugin=python",
        MockResponse::ok("python-jar-bytes"),
    );

    let storage = tempfile::tempdir().unwrap();
    let plugins_dir = storage.path().join("plugins");
    tokio::fs::create_dir_all(&plugins_dir).await.unwrap();
    tokio::fs::write(plugins_dir.join(TEXT_JAR), "cached").await.unwrap();
    tokio::fs::write(plugins_dir.join("sonar-old-plugin-1.0.jar"), "stale")
        .await
        .unwrap();
    tokio::fs::write(plugins_dir.join("README.txt"), "keep").await.unwrap();

    let api = server_api(&self_hosted(&server.url()));
    let sync = PluginsSynchronizer::new(api.plugins(), storage.path());
    assert_eq!(sync.plugins_dir(), plugins_dir);

    let set = sync.synchronize().await.unwrap();
    assert_eq!(
        set.paths,
        BTreeSet::from([plugins_dir.join(PYTHON_JAR), plugins_dir.join(TEXT_JAR)])
    );
    assert_eq!(
        set.languages,
        BTreeSet::from([Language::Ipython, Language::Python, Language::Secrets])
    );

    assert_eq!(read(&plugins_dir.join(PYTHON_JAR)).await, "python-jar-bytes");
    assert_eq!(read(&plugins_dir.join(TEXT_JAR)).await, "cached");
    assert!(!plugins_dir.join("sonar-old-plugin-1.0.jar").exists());
    assert!(plugins_dir.join("README.txt").exists());
    assert!(!plugins_dir.join("sonar-scm-git-plugin-2.0.jar").exists());

    let downloads: Vec<_> = server
        .requests()
        .into_iter()
        .filter(|r| r.path.starts_with("/api/plugins/download"))
        .collect();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].path, "/api/plugins/download?plugin=python");
    assert_eq!(downloads[0].header("authorization"), Some("Bearer squ_t"));
}

#[tokio::test]
async fn test_sync_fails_when_download_fails() {
    let server = MockWebServer::start().await;
    server.get(
        "/api/plugins/installed",
        installed(json!([
            {"key": "java", "filename": "sonar-java-plugin-8.0.jar", "sonarLintSupported": true},
        ])),
    );
    server.get(
        "/api/plugins/download?plugin=java",
        MockResponse::status(500, "boom"),
    );

    let storage = tempfile::tempdir().unwrap();
    let api = server_api(&self_hosted(&server.url()));
    let err = PluginsSynchronizer::new(api.plugins(), storage.path())
        .synchronize()
        .await
        .unwrap_err();

    match err {
        PluginSyncError::Download { key, source } => {
            assert_eq!(key, "java");
            assert!(matches!(source, ApiError::ServerError(_)));
        }
        other => panic!("expected a download error, got {other:?}"),
    }
    assert!(!storage.path().join("plugins/sonar-java-plugin-8.0.jar").exists());
}

#[tokio::test]
async fn test_sync_skips_file_names_outside_plugins_dir() {
    let server = MockWebServer::start().await;
    server.get(
        "/api/plugins/installed",
        installed(json!([
            {"key": "python", "filename": "../sonar-python-plugin.jar", "sonarLintSupported": true},
        ])),
    );

    let storage = tempfile::tempdir().unwrap();
    let api = server_api(&self_hosted(&server.url()));
    let set = PluginsSynchronizer::new(api.plugins(), storage.path())
        .synchronize()
        .await
        .unwrap();

    assert!(set.paths.is_empty());
    assert!(
        server
            .requests()
            .iter()
            .all(|r| !r.path.starts_with("/api/plugins/download"))
    );
}

#[tokio::test]
async fn test_sync_surfaces_listing_errors() {
    let server = MockWebServer::start().await;
    server.get("/api/plugins/installed", MockResponse::status(401, ""));

    let storage = tempfile::tempdir().unwrap();
    let api = server_api(&self_hosted(&server.url()));
    let err = PluginsSynchronizer::new(api.plugins(), storage.path())
        .synchronize()
        .await
        .unwrap_err();
    assert!(matches!(err, PluginSyncError::Api(ApiError::Unauthorized)));
}

#[tokio::test]
async fn test_version_gate() {
    let server = MockWebServer::start().await;
    let api = server_api(&self_hosted(&server.url()));

    for (version, supported) in [
        ("2025.1.0.102418", true),
        ("25.1.0.102122", true),
        ("10.9", true),
        ("10.8.1.101195", false),
        ("9.9.8.100196", false),
    ] {
        server.get(
            "/api/system/status",
            MockResponse::json(200, json!({"id": "x", "version": version, "status": "UP"})),
        );
        let result = api.ensure_supported_version().await;
        assert_eq!(result.is_ok(), supported, "{version}");
        if let Err(err) = result {
            assert!(matches!(err, ApiError::UnsupportedVersion(ref v) if v == version));
            assert!(err.to_string().contains("SQS 2025.1"));
        }
    }
}

#[tokio::test]
async fn test_cloud_skips_version_check() {
    let server = MockWebServer::start().await;
    let api = server_api(&ServerConfig {
        url: server.url(),
        cloud_url: server.url(),
        organization: Some("my-org".to_string()),
        token: None,
    });
    assert!(api.is_cloud());

    api.ensure_supported_version().await.unwrap();
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn test_context_start_rejects_old_server() {
    let ctx = TestContext::with_stub(StubEngine::new()).await;
    ctx.server.get(
        "/api/system/status",
        MockResponse::json(200, json!({"id": "x", "version": "10.4.1", "status": "UP"})),
    );

    let err = ctx.context.start().await.unwrap_err();
    assert!(
        matches!(err, StartupError::Server(ApiError::UnsupportedVersion(_))),
        "got {err:?}"
    );
    assert_eq!(ctx.context.engine().state(), EngineState::NotStarted);
    assert!(ctx.engine.requests_named(method::INITIALIZE).is_empty());
}

#[tokio::test]
async fn test_context_start_initializes_engine_with_synced_plugins() {
    let ctx = TestContext::with_stub(StubEngine::new()).await;
    ctx.server.get(
        "/api/plugins/installed",
        installed(json!([
            {"key": "python", "filename": PYTHON_JAR, "sonarLintSupported": true},
        ])),
    );
    ctx.server.get(
        "/api/plugins/download?plugin=python",
        MockResponse::ok("python-jar-bytes"),
    );

    ctx.context.start().await.unwrap();

    let expected = ctx
        .config
        .engine
        .storage_path
        .join("plugins")
        .join(PYTHON_JAR);
    let init = ctx.engine.requests_named(method::INITIALIZE);
    assert_eq!(init.len(), 1);
    assert_eq!(
        init[0]["embeddedPluginPaths"],
        json!([expected.to_string_lossy()])
    );
    assert_eq!(
        init[0]["enabledLanguagesInStandaloneMode"],
        json!(["IPYTHON", "PYTHON"])
    );
    ctx.context.shutdown().await;
}

#[tokio::test]
async fn test_context_start_uses_local_plugins_when_configured() {
    let local = tempfile::tempdir().unwrap();
    tokio::fs::write(local.path().join("sonar-go-plugin-1.9.jar"), "")
        .await
        .unwrap();
    let ctx = TestContext::new(
        TestConfigBuilder::new().plugins_path(local.path()),
        StubEngine::new(),
    )
    .await;

    ctx.context.start().await.unwrap();

    let init = ctx.engine.requests_named(method::INITIALIZE);
    assert_eq!(init[0]["enabledLanguagesInStandaloneMode"], json!(["GO"]));
    assert!(
        ctx.server
            .requests()
            .iter()
            .all(|r| !r.path.starts_with("/api/plugins"))
    );
    ctx.context.shutdown().await;
}
