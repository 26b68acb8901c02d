#![deny(unsafe_code)]

//! Bridges between synchronous tool handlers and the two asynchronous
//! collaborators they depend on.
//!
//! - [`engine`] drives the local analysis engine over newline-framed JSON-RPC
//!   (loopback or subprocess transport), including the `initialize` handshake.
//! - [`http`] wraps a pooled `reqwest` client into cancellable completion
//!   handles with bearer-token injection.
//! - [`api`] builds REST URLs and classifies failed responses.
//! - [`plugins`] mirrors the server's analyzer jars for the engine.
//! - [`context`] owns one instance of each and is handed to every call site.

use std::future::Future;
use std::pin::Pin;

/// Boxed `Send` future returned by trait methods used through `Arc<dyn _>`,
/// such as [`engine::EngineService::handle_request`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// REST API helper, response classification, and typed endpoints.
pub mod api;
/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Cancellable task handles bridging async work to blocking callers.
pub mod completion;
/// Process-wide owner of the engine bridge and HTTP pool.
pub mod context;
/// Analysis engine connection: transport, JSON-RPC, handshake, operations.
pub mod engine;
/// Pooled HTTP client bridge.
pub mod http;
pub mod plugins;

pub use api::{ApiError, ServerApi, ServerApiHelper};
pub use completion::{Completion, WaitError};
pub use context::{BridgeContext, StartupError};
pub use engine::{EngineBridge, EngineError, EngineService, Transport};
pub use http::{HttpClient, HttpClientProvider, HttpError, HttpResponse, PendingResponse};
