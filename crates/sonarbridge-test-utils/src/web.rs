//! A recording mock web server.
//!
//! Routes are registered per method and path (the query string is matched
//! first, then the bare path). Unregistered routes answer `404`. Every
//! request is recorded, headers lowercased.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A canned reply.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
    pub delay: Option<Duration>,
}

impl MockResponse {
    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.as_bytes().to_vec(),
            headers: Vec::new(),
            delay: None,
        }
    }

    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self::status(status, &body.to_string()).with_header("content-type", "application/json")
    }

    pub fn redirect(status: u16, location: &str) -> Self {
        Self::status(status, "").with_header("location", location)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path plus query string.
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Default)]
struct Shared {
    routes: Mutex<HashMap<(String, String), MockResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
    completed: AtomicUsize,
}

pub struct MockWebServer {
    url: String,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl MockWebServer {
    /// Bind an ephemeral port on 127.0.0.1 and start serving.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock server");
        let addr = listener.local_addr().expect("no local address");
        let shared = Arc::new(Shared::default());

        let app = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&shared));
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: format!("http://{addr}"),
            shared,
            task,
        }
    }

    /// Base url without a trailing slash.
    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.url, path.trim_start_matches('/'))
    }

    pub fn register(&self, method: &str, path: &str, response: MockResponse) {
        self.shared
            .routes
            .lock()
            .unwrap()
            .insert((method.to_ascii_uppercase(), path.to_string()), response);
    }

    pub fn get(&self, path: &str, response: MockResponse) {
        self.register("GET", path, response);
    }

    pub fn post(&self, path: &str, response: MockResponse) {
        self.register("POST", path, response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.shared.requests.lock().unwrap().last().cloned()
    }

    /// Number of canned responses whose delay elapsed and that were handed
    /// back to the connection.
    pub fn completed_responses(&self) -> usize {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// Wait until a request for `path` (path plus query) has arrived.
    pub async fn wait_for_request(&self, path: &str, timeout: Duration) -> Option<RecordedRequest> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let found = self.requests().into_iter().find(|r| r.path == path);
            if found.is_some() || tokio::time::Instant::now() >= deadline {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockWebServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle(
    State(shared): State<Arc<Shared>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    shared.requests.lock().unwrap().push(RecordedRequest {
        method: method.as_str().to_string(),
        path: path.clone(),
        headers: headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_ascii_lowercase(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body: body.to_vec(),
    });

    let canned = {
        let routes = shared.routes.lock().unwrap();
        routes
            .get(&(method.as_str().to_string(), path))
            .or_else(|| routes.get(&(method.as_str().to_string(), uri.path().to_string())))
            .cloned()
    };

    let Some(canned) = canned else {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .expect("valid response");
    };

    if let Some(delay) = canned.delay {
        tokio::time::sleep(delay).await;
    }

    shared.completed.fetch_add(1, Ordering::SeqCst);
    let mut builder = Response::builder().status(canned.status);
    for (name, value) in &canned.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(canned.body))
        .expect("valid response")
}
