//! HTTP bridge behaviour against a local mock server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use sonarbridge_config::{HttpConfig, Token};
use sonarbridge_core::http::{HttpClientProvider, HttpError, JSON_CONTENT_TYPE};
use sonarbridge_test_utils::{MockResponse, MockWebServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::runtime::Handle;

fn provider() -> Arc<HttpClientProvider> {
    let config = HttpConfig {
        connect_timeout_secs: 2,
        request_timeout_secs: 10,
        ..HttpConfig::default()
    };
    Arc::new(
        HttpClientProvider::new(&config, "SonarQube MCP Server test", Handle::current())
            .expect("provider"),
    )
}

#[tokio::test]
async fn test_get_sends_bearer_token_when_configured() {
    let server = MockWebServer::start().await;
    server.get("/api/x", MockResponse::ok("hello"));
    let provider = provider();

    let token = Token::new("squ_secret");
    let resp = provider
        .client(Some(&token))
        .get_async(&server.url_for("/api/x"))
        .await
        .unwrap();
    assert_eq!(resp.code(), 200);
    assert_eq!(resp.body_as_str(), "hello");
    assert_eq!(resp.url(), server.url_for("/api/x"));

    let recorded = server.last_request().unwrap();
    assert_eq!(recorded.header("authorization"), Some("Bearer squ_secret"));
    assert_eq!(
        recorded.header("user-agent"),
        Some("SonarQube MCP Server test")
    );
}

#[tokio::test]
async fn test_no_authorization_header_without_token() {
    let server = MockWebServer::start().await;
    server.get("/api/x", MockResponse::ok(""));
    let provider = provider();

    provider
        .anonymous()
        .get_async(&server.url_for("/api/x"))
        .await
        .unwrap();
    assert_eq!(server.last_request().unwrap().header("authorization"), None);

    let token = Token::new("squ_secret");
    provider
        .client(Some(&token))
        .get_anonymous_async(&server.url_for("/api/x"))
        .await
        .unwrap();
    assert_eq!(server.last_request().unwrap().header("authorization"), None);
}

#[tokio::test]
async fn test_post_sends_body_and_content_type() {
    let server = MockWebServer::start().await;
    server.post("/api/issues/do_transition", MockResponse::ok("{}"));

    let resp = provider()
        .anonymous()
        .post_async(
            &server.url_for("/api/issues/do_transition"),
            JSON_CONTENT_TYPE,
            r#"{"issue":"AX1"}"#,
        )
        .await
        .unwrap();
    assert!(resp.is_successful());

    let recorded = server.last_request().unwrap();
    assert_eq!(recorded.method, "POST");
    assert_eq!(recorded.body_str(), r#"{"issue":"AX1"}"#);
    assert_eq!(recorded.header("content-type"), Some(JSON_CONTENT_TYPE));
}

#[tokio::test]
async fn test_post_redirect_is_followed_as_post() {
    let server = MockWebServer::start().await;
    server.post("/old", MockResponse::redirect(301, "/new"));
    server.post("/new", MockResponse::ok("moved"));

    let token = Token::new("squ_secret");
    let resp = provider()
        .client(Some(&token))
        .post_async(&server.url_for("/old"), "text/plain", "payload")
        .await
        .unwrap();
    assert_eq!(resp.code(), 200);
    assert_eq!(resp.body_as_str(), "moved");
    assert_eq!(resp.url(), server.url_for("/old"));

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    let followed = &requests[1];
    assert_eq!(followed.method, "POST");
    assert_eq!(followed.path, "/new");
    assert_eq!(followed.body_str(), "payload");
    assert_eq!(followed.header("authorization"), Some("Bearer squ_secret"));
}

#[tokio::test]
async fn test_token_not_forwarded_to_other_host() {
    let first = MockWebServer::start().await;
    let second = MockWebServer::start().await;
    first.get("/start", MockResponse::redirect(302, &second.url_for("/landing")));
    second.get("/landing", MockResponse::ok("elsewhere"));

    let token = Token::new("squ_secret");
    let resp = provider()
        .client(Some(&token))
        .get_async(&first.url_for("/start"))
        .await
        .unwrap();
    assert_eq!(resp.body_as_str(), "elsewhere");
    assert_eq!(
        first.last_request().unwrap().header("authorization"),
        Some("Bearer squ_secret")
    );
    assert_eq!(second.last_request().unwrap().header("authorization"), None);
}

#[tokio::test]
async fn test_redirect_loop_is_bounded() {
    let server = MockWebServer::start().await;
    server.get("/loop", MockResponse::redirect(302, "/loop"));

    let err = provider()
        .anonymous()
        .get_async(&server.url_for("/loop"))
        .await
        .unwrap_err();
    assert!(matches!(err, HttpError::TooManyRedirects(_)));
}

#[tokio::test]
async fn test_non_success_is_returned_not_raised() {
    let server = MockWebServer::start().await;
    server.get("/missing", MockResponse::status(404, "nope"));

    let resp = provider()
        .anonymous()
        .get_async(&server.url_for("/missing"))
        .await
        .unwrap();
    assert_eq!(resp.code(), 404);
    assert!(!resp.is_successful());
    assert_eq!(resp.body_as_str(), "nope");
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_request() {
    let server = MockWebServer::start().await;
    server.get(
        "/slow",
        MockResponse::ok("late").with_delay(Duration::from_secs(30)),
    );

    let pending = provider().anonymous().get_async(&server.url_for("/slow"));
    let native = pending.native_handle().unwrap().clone();
    assert!(!pending.is_done());
    server
        .wait_for_request("/slow", Duration::from_secs(5))
        .await
        .expect("request reached the server");

    assert!(pending.cancel());
    assert!(pending.is_cancelled());
    assert!(!pending.cancel());

    let err = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("cancelled request settles promptly")
        .unwrap_err();
    assert!(matches!(err, HttpError::Cancelled));

    for _ in 0..100 {
        if native.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(native.is_finished());
    assert_eq!(server.completed_responses(), 0);
}

#[tokio::test]
async fn test_redirect_body_is_drained_for_connection_reuse() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    tokio::spawn(serve_keep_alive(listener, Arc::clone(&accepted)));

    let provider = provider();
    let client = provider.anonymous();
    for _ in 0..3 {
        let resp = client.get_async(&format!("{base}/start")).await.unwrap();
        assert_eq!(resp.code(), 200);
        assert_eq!(resp.body_as_str(), "ok");
    }
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

/// Minimal keep-alive HTTP/1.1 server: `/start` redirects to `/done` with a
/// body, everything else answers `ok`. Counts accepted connections.
async fn serve_keep_alive(listener: TcpListener, accepted: Arc<AtomicUsize>) {
    while let Ok((mut stream, _)) = listener.accept().await {
        accepted.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let end = loop {
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                };
                let head: Vec<u8> = buf.drain(..end).collect();
                let reply = if head.starts_with(b"GET /start ") {
                    let body = "moved to /done\n".repeat(64);
                    format!(
                        "HTTP/1.1 302 Found\r\nLocation: /done\r\nContent-Length: {}\r\n\r\n{body}",
                        body.len()
                    )
                } else {
                    "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_string()
                };
                if stream.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
            }
        });
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_calls_from_plain_thread() {
    let server = MockWebServer::start().await;
    server.get("/api/system/ping", MockResponse::ok("pong"));
    server.post("/echo", MockResponse::ok("posted"));
    let client = provider().anonymous();
    let ping = server.url_for("/api/system/ping");
    let echo = server.url_for("/echo");

    let (ping_body, post_body) = tokio::task::spawn_blocking(move || {
        let ping = client.get(&ping).unwrap();
        let post = client.post(&echo, "text/plain", "x").unwrap();
        (ping.body_as_str().to_string(), post.body_as_str().to_string())
    })
    .await
    .unwrap();
    assert_eq!(ping_body, "pong");
    assert_eq!(post_body, "posted");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wait_timeout_cancels_request() {
    let server = MockWebServer::start().await;
    server.get(
        "/slow",
        MockResponse::ok("late").with_delay(Duration::from_secs(30)),
    );
    let client = provider().anonymous();
    let url = server.url_for("/slow");

    let err = tokio::task::spawn_blocking(move || {
        client
            .get_async(&url)
            .wait_timeout(Duration::from_millis(100))
            .unwrap_err()
    })
    .await
    .unwrap();
    assert!(matches!(err, HttpError::Timeout));
}

#[tokio::test]
async fn test_connection_refused_is_connect_error() {
    let url = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}/api", listener.local_addr().unwrap())
    };
    let err = provider().anonymous().get_async(&url).await.unwrap_err();
    assert!(matches!(err, HttpError::Connect(_)), "got {err:?}");
}

#[tokio::test]
async fn test_invalid_url() {
    let err = provider()
        .anonymous()
        .get_async("not a url")
        .await
        .unwrap_err();
    assert!(matches!(err, HttpError::InvalidUrl { .. }));
}
