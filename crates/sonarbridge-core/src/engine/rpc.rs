//! Newline-framed JSON-RPC 2.0 over an arbitrary byte stream.
//!
//! Both ends of the engine connection live here: [`RpcConnection`] is the
//! client side used by the bridge, and [`serve`] drives an [`EngineService`]
//! on the far end of a loopback channel.
//!
//! Each connection runs one reader task and one writer task. Outgoing frames
//! go through an unbounded FIFO queue, so enqueueing is synchronous and frames
//! are written in call order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};

use super::protocol::{LogLevel, LogParams, method};
use crate::BoxFuture;

const JSONRPC_VERSION: &str = "2.0";

/// Errors from the client side of the connection.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("engine returned error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("engine connection closed")]
    ConnectionClosed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
}

impl ResponseError {
    pub const INVALID_PARAMS: i64 = -32602;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    pub fn invalid_params(err: impl std::fmt::Display) -> Self {
        Self::new(Self::INVALID_PARAMS, format!("invalid params: {err}"))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }
}

impl From<ResponseError> for RpcError {
    fn from(err: ResponseError) -> Self {
        RpcError::Remote {
            code: err.code,
            message: err.message,
        }
    }
}

#[derive(Serialize)]
struct OutgoingRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Serialize)]
struct OutgoingNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
}

#[derive(Serialize)]
struct OutgoingResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ResponseError>,
}

impl OutgoingResponse {
    fn from_result(id: Value, result: Result<Value, ResponseError>) -> Self {
        match result {
            Ok(value) => Self {
                jsonrpc: JSONRPC_VERSION,
                id,
                result: Some(value),
                error: None,
            },
            Err(err) => Self {
                jsonrpc: JSONRPC_VERSION,
                id,
                result: None,
                error: Some(err),
            },
        }
    }
}

/// Any incoming frame. Which members are present decides what it is.
#[derive(Deserialize)]
struct Incoming {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ResponseError>,
}

enum Frame {
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: Value,
        result: Result<Value, ResponseError>,
    },
}

impl Incoming {
    fn classify(self) -> Option<Frame> {
        match (self.id, self.method) {
            (Some(id), Some(method)) => Some(Frame::Request {
                id,
                method,
                params: self.params.unwrap_or(Value::Null),
            }),
            (None, Some(method)) => Some(Frame::Notification {
                method,
                params: self.params.unwrap_or(Value::Null),
            }),
            (Some(id), None) => Some(Frame::Response {
                id,
                result: match self.error {
                    Some(err) => Err(err),
                    None => Ok(self.result.unwrap_or(Value::Null)),
                },
            }),
            (None, None) => None,
        }
    }
}

fn encode<T: Serialize>(frame: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

fn parse_frame(line: &str) -> Option<Frame> {
    match serde_json::from_str::<Incoming>(line) {
        Ok(incoming) => {
            let frame = incoming.classify();
            if frame.is_none() {
                warn!("Dropping JSON-RPC frame with neither id nor method");
            }
            frame
        }
        Err(e) => {
            warn!(error = %e, "Dropping malformed JSON-RPC frame");
            None
        }
    }
}

async fn write_loop<W>(writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer;
    while let Some(line) = rx.recv().await {
        trace!(frame = %line, "->");
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(error = %e, "Failed to write JSON-RPC frame");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>;

/// Requests awaiting a response. `None` once the connection has closed, so
/// late requests fail instead of waiting forever.
struct Pending(Mutex<Option<PendingMap>>);

impl Pending {
    fn open() -> Self {
        Self(Mutex::new(Some(HashMap::new())))
    }

    fn lock(&self) -> MutexGuard<'_, Option<PendingMap>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, id: u64, tx: oneshot::Sender<Result<Value, RpcError>>) -> bool {
        match self.lock().as_mut() {
            Some(map) => {
                map.insert(id, tx);
                true
            }
            None => false,
        }
    }

    fn remove(&self, id: u64) -> Option<oneshot::Sender<Result<Value, RpcError>>> {
        self.lock().as_mut().and_then(|map| map.remove(&id))
    }

    /// Fail every outstanding request and refuse new ones.
    fn close(&self) {
        let drained = self.lock().take();
        for (_, tx) in drained.into_iter().flatten() {
            let _ = tx.send(Err(RpcError::ConnectionClosed));
        }
    }
}

/// Client end of a JSON-RPC connection to the engine.
pub struct RpcConnection {
    outgoing: mpsc::UnboundedSender<String>,
    pending: Arc<Pending>,
    next_id: AtomicU64,
    tasks: [AbortHandle; 2],
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection").finish_non_exhaustive()
    }
}

impl RpcConnection {
    /// Spawn the reader and writer tasks for a connection over the given
    /// stream halves.
    pub fn start<R, W>(runtime: &Handle, reader: R, writer: W) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Pending::open());

        let writer_task = runtime.spawn(write_loop(writer, rx));
        let reader_task = runtime.spawn(client_read_loop(
            reader,
            Arc::clone(&pending),
            tx.clone(),
        ));

        Arc::new(Self {
            outgoing: tx,
            pending,
            next_id: AtomicU64::new(1),
            tasks: [reader_task.abort_handle(), writer_task.abort_handle()],
        })
    }

    /// Send a request. The frame is queued before this returns; the future
    /// resolves with the `result` member or the remote error.
    pub fn request(
        &self,
        method: &str,
        params: Value,
    ) -> BoxFuture<'static, Result<Value, RpcError>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = match encode(&OutgoingRequest {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }) {
            Ok(line) => line,
            Err(e) => return Box::pin(async move { Err(RpcError::Json(e)) }),
        };

        let (tx, rx) = oneshot::channel();
        if !self.pending.insert(id, tx) {
            return Box::pin(async { Err(RpcError::ConnectionClosed) });
        }
        if self.outgoing.send(line).is_err() {
            self.pending.remove(id);
            return Box::pin(async { Err(RpcError::ConnectionClosed) });
        }
        debug!(id, method, "Sent engine request");

        Box::pin(async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(RpcError::ConnectionClosed),
            }
        })
    }

    /// Queue a notification.
    pub fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        let line = encode(&OutgoingNotification {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        })?;
        self.outgoing
            .send(line)
            .map_err(|_| RpcError::ConnectionClosed)?;
        debug!(method, "Sent engine notification");
        Ok(())
    }

    /// Stop both I/O tasks and fail outstanding requests.
    pub fn close(&self) {
        for task in &self.tasks {
            task.abort();
        }
        self.pending.close();
    }

    pub fn is_closed(&self) -> bool {
        self.pending.lock().is_none() || self.outgoing.is_closed()
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn client_read_loop<R>(
    reader: R,
    pending: Arc<Pending>,
    outgoing: mpsc::UnboundedSender<String>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Engine closed its output stream");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read from engine");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        trace!(frame = %line, "<-");

        match parse_frame(line) {
            Some(Frame::Response { id, result }) => {
                let Some(id) = id.as_u64() else {
                    warn!(%id, "Response with non-numeric id");
                    continue;
                };
                match pending.remove(id) {
                    Some(tx) => {
                        let _ = tx.send(result.map_err(RpcError::from));
                    }
                    None => debug!(id, "Response for unknown or abandoned request"),
                }
            }
            Some(Frame::Notification { method, params }) => {
                handle_engine_notification(&method, params);
            }
            Some(Frame::Request { id, method, .. }) => {
                debug!(method = %method, "Rejecting engine request");
                let reply = OutgoingResponse::from_result(
                    id,
                    Err(ResponseError::method_not_found(&method)),
                );
                match encode(&reply) {
                    Ok(line) => {
                        let _ = outgoing.send(line);
                    }
                    Err(e) => warn!(error = %e, "Failed to encode error reply"),
                }
            }
            None => {}
        }
    }
    pending.close();
}

/// Re-emit engine `log` notifications under the `sonarbridge::engine` target.
fn handle_engine_notification(name: &str, params: Value) {
    if name != method::LOG {
        debug!(method = name, "Ignoring engine notification");
        return;
    }
    match serde_json::from_value::<LogParams>(params) {
        Ok(log) => match log.level {
            LogLevel::Error => error!(target: "sonarbridge::engine", "{}", log.message),
            LogLevel::Warn => warn!(target: "sonarbridge::engine", "{}", log.message),
            LogLevel::Info => info!(target: "sonarbridge::engine", "{}", log.message),
            LogLevel::Debug => debug!(target: "sonarbridge::engine", "{}", log.message),
            LogLevel::Trace => trace!(target: "sonarbridge::engine", "{}", log.message),
        },
        Err(e) => warn!(error = %e, "Malformed engine log notification"),
    }
}

// ── Engine side ────────────────────────────────────────────────────────

/// Handle given to an [`EngineService`] for pushing notifications to the
/// client.
#[derive(Clone)]
pub struct EnginePeer {
    outgoing: mpsc::UnboundedSender<String>,
}

impl EnginePeer {
    pub fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        let line = encode(&OutgoingNotification {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        })?;
        self.outgoing
            .send(line)
            .map_err(|_| RpcError::ConnectionClosed)
    }

    /// Emit a `log` notification.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) -> Result<(), RpcError> {
        let params = serde_json::to_value(LogParams {
            level,
            message: message.into(),
        })?;
        self.notify(method::LOG, params)
    }
}

/// An engine reachable in-process over a loopback channel.
///
/// Implementations must be `Send + Sync`; requests are handled concurrently,
/// one task each.
pub trait EngineService: Send + Sync {
    /// Called once per connection before any frame is read.
    fn on_connect(&self, _peer: EnginePeer) {}

    fn handle_request(&self, method: &str, params: Value)
    -> BoxFuture<'_, Result<Value, ResponseError>>;

    fn handle_notification(&self, method: &str, params: Value);
}

/// Serve `service` over the given stream halves until the client hangs up.
///
/// Dropping the returned future stops the writer and every in-flight request.
pub async fn serve<R, W>(reader: R, writer: W, service: Arc<dyn EngineService>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let mut tasks = JoinSet::new();
    tasks.spawn(write_loop(writer, rx));

    service.on_connect(EnginePeer {
        outgoing: tx.clone(),
    });

    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Engine endpoint read failed");
                break;
            }
        };
        while tasks.try_join_next().is_some() {}

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_frame(line) {
            Some(Frame::Request { id, method, params }) => {
                let service = Arc::clone(&service);
                let tx = tx.clone();
                tasks.spawn(async move {
                    let result = service.handle_request(&method, params).await;
                    match encode(&OutgoingResponse::from_result(id, result)) {
                        Ok(line) => {
                            let _ = tx.send(line);
                        }
                        Err(e) => warn!(error = %e, method = %method, "Failed to encode engine reply"),
                    }
                });
            }
            Some(Frame::Notification { method, params }) => {
                service.handle_notification(&method, params);
            }
            Some(Frame::Response { .. }) => debug!("Engine endpoint ignoring response frame"),
            None => {}
        }
    }
    debug!("Loopback client disconnected");
}
