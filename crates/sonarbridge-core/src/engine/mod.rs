//! Analysis engine connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  notify / request   ┌───────────────┐   lines    ┌──────────┐
//! │ EngineBridge │────────────────────▶│ RpcConnection │───────────▶│  engine  │
//! │ (ready cell) │◀────────────────────│ reader/writer │◀───────────│ loopback │
//! └──────────────┘   results, `log`    └───────────────┘            │ or child │
//!                                                                   └──────────┘
//! ```
//!
//! Every operation is chained off the bridge's ready handle, which resolves
//! once the `initialize` handshake succeeds. If the handshake fails the handle
//! is cancelled and chained operations never run.

pub mod bridge;
pub mod languages;
pub mod protocol;
pub mod rpc;
pub mod snippet;
pub mod transport;

use std::time::Duration;

pub use bridge::{
    AnalysisFuture, AnalysisSession, EngineBridge, EngineHandle, EngineSettings, EngineState,
    PROJECT_ID,
};
pub use languages::{Analyzer, Language, PluginSet, discover_plugins};
pub use protocol::{AnalysisResult, BackendCapability, FileRegistration, RawIssue};
pub use rpc::{EnginePeer, EngineService, ResponseError, RpcConnection, RpcError};
pub use snippet::analyze_snippet;
pub use transport::{Transport, TransportError};

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("engine handshake failed: {0}")]
    HandshakeFailure(String),

    #[error("analysis timed out after {0:?}")]
    AnalysisTimeout(Duration),

    #[error("engine operation was cancelled")]
    Cancelled,

    #[error("engine transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("engine RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidPath(#[from] protocol::InvalidPath),
}
