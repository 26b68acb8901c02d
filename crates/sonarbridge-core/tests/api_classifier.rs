//! REST helper and classifier behaviour against a local mock server.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use sonarbridge_config::{ServerConfig, Token};
use sonarbridge_core::api::{ApiError, ServerApi, Version};
use sonarbridge_core::http::HttpClientProvider;
use sonarbridge_test_utils::{MockResponse, MockWebServer, TestConfigBuilder};
use tokio::runtime::Handle;

fn server_api(url: &str, token: Option<&str>) -> ServerApi {
    let config = TestConfigBuilder::new().server_url(url).build();
    let provider = Arc::new(
        HttpClientProvider::new(&config.http, "sonarbridge-test", Handle::current()).unwrap(),
    );
    let server = ServerConfig {
        token: token.map(Token::new),
        ..config.server
    };
    ServerApi::from_config(&server, &provider)
}

#[tokio::test]
async fn test_forbidden_uses_server_message() {
    let server = MockWebServer::start().await;
    server.get(
        "/api/x",
        MockResponse::json(403, json!({"errors": [{"msg": "no access"}]})),
    );
    let api = server_api(&server.url(), Some("squ_t"));

    let err = api.helper().get_async("/api/x").await.unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
    assert_eq!(err.to_string(), "no access");
}

#[tokio::test]
async fn test_not_found_names_url() {
    let server = MockWebServer::start().await;
    let api = server_api(&server.url(), None);

    let err = api.helper().get_async("api/unknown").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("Error 404 on {}", server.url_for("/api/unknown"))
    );
}

#[tokio::test]
async fn test_unauthorized_and_server_error() {
    let server = MockWebServer::start().await;
    server.get("/api/auth", MockResponse::status(401, ""));
    server.get("/api/boom", MockResponse::status(502, "gateway"));
    let api = server_api(&server.url(), Some("squ_bad"));

    let err = api.helper().get_async("/api/auth").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Not authorized. Please check server credentials."
    );

    let err = api.helper().get_async("/api/boom").await.unwrap_err();
    assert!(matches!(err, ApiError::ServerError(_)));
    assert_eq!(
        err.to_string(),
        format!("Error 502 on {}", server.url_for("/api/boom"))
    );
}

#[tokio::test]
async fn test_generic_error_carries_detail() {
    let server = MockWebServer::start().await;
    server.post(
        "/api/issues/set_tags",
        MockResponse::json(400, json!({"errors": [{"msg": "Tag is invalid"}]})),
    );
    let api = server_api(&server.url(), Some("squ_t"));

    let err = api
        .helper()
        .post_async("/api/issues/set_tags", "application/x-www-form-urlencoded", "tags=x")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "Error 400 on {}: Tag is invalid",
            server.url_for("/api/issues/set_tags")
        )
    );
}

#[tokio::test]
async fn test_transport_failure_passes_through() {
    let url = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    };
    let api = server_api(&url, None);
    let err = api.helper().get_async("/api/x").await.unwrap_err();
    assert!(matches!(err, ApiError::Http(_)));
}

#[tokio::test]
async fn test_raw_get_does_not_classify() {
    let server = MockWebServer::start().await;
    server.get("/api/x", MockResponse::status(500, "oops"));
    let api = server_api(&server.url(), None);

    let resp = api.helper().raw_get_async("/api/x").await.unwrap();
    assert_eq!(resp.code(), 500);
    assert_eq!(resp.body_as_str(), "oops");
}

#[tokio::test]
async fn test_system_endpoints() {
    let server = MockWebServer::start().await;
    server.get("/api/system/ping", MockResponse::ok("pong"));
    server.get(
        "/api/system/status",
        MockResponse::json(
            200,
            json!({"id": "20250101", "version": "2025.1.0.100", "status": "UP"}),
        ),
    );
    server.get(
        "/api/system/health",
        MockResponse::json(200, json!({"health": "GREEN", "causes": []})),
    );
    let api = server_api(&server.url(), Some("squ_t"));
    assert!(api.is_authentication_set());

    let system = api.system();
    assert_eq!(system.ping().await.unwrap(), "pong");
    assert_eq!(server.last_request().unwrap().header("authorization"), None);

    let status = system.status().await.unwrap();
    assert_eq!(status.status, "UP");
    assert!(
        status
            .parsed_version()
            .unwrap()
            .satisfies_min_requirement(&Version::parse("10.8").unwrap())
    );
    assert_eq!(server.last_request().unwrap().header("authorization"), None);

    let health = system.health().await.unwrap();
    assert_eq!(health.health, "GREEN");
    assert_eq!(
        server.last_request().unwrap().header("authorization"),
        Some("Bearer squ_t")
    );
}

#[tokio::test]
async fn test_status_parse_failure() {
    let server = MockWebServer::start().await;
    server.get("/api/system/status", MockResponse::ok("<html>"));
    let api = server_api(&server.url(), None);

    let err = api.system().status().await.unwrap_err();
    assert!(matches!(err, ApiError::Parse(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_helper_from_plain_thread() {
    let server = MockWebServer::start().await;
    server.get("/api/system/ping", MockResponse::ok("pong"));
    server.get("/api/gone", MockResponse::status(404, ""));
    let api = server_api(&server.url(), None);

    let (ping, err) = tokio::task::spawn_blocking(move || {
        let system = api.system();
        (
            system.ping_blocking().unwrap(),
            api.helper().get("/api/gone").unwrap_err().to_string(),
        )
    })
    .await
    .unwrap();
    assert_eq!(ping, "pong");
    assert!(err.starts_with("Error 404 on "));
}
