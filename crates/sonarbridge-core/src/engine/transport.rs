//! Byte-stream channels to the analysis engine.
//!
//! A [`Transport`] is opened once into a [`DuplexChannel`]: a reader, a writer,
//! and the [`Launcher`] that owns whatever produces the other end (a loopback
//! server task or a child process).

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use sonarbridge_config::{EngineConfig, EngineTransportKind};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::rpc::{self, EngineService};

/// Capacity of each direction of the in-process pipe.
const LOOPBACK_BUFFER: usize = 64 * 1024;

/// How long an engine process gets to exit on its own once its stdin closes.
const PROCESS_EXIT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to spawn engine process `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("engine process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("loopback transport selected but no embedded engine is available")]
    NoEmbeddedEngine,

    #[error("process transport selected but no engine command is configured")]
    NoCommand,
}

pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// How the engine is reached.
pub enum Transport {
    /// An in-process engine served over a `tokio::io::duplex` pipe.
    Loopback(Arc<dyn EngineService>),
    /// An external engine spoken to over its stdin/stdout.
    Process { command: String, args: Vec<String> },
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Loopback(_) => f.write_str("Loopback"),
            Transport::Process { command, args } => f
                .debug_struct("Process")
                .field("command", command)
                .field("args", args)
                .finish(),
        }
    }
}

impl Transport {
    /// Select the transport named in `config`.
    pub fn from_config(
        config: &EngineConfig,
        embedded: Option<Arc<dyn EngineService>>,
    ) -> Result<Self, TransportError> {
        match config.transport {
            EngineTransportKind::Loopback => embedded
                .map(Transport::Loopback)
                .ok_or(TransportError::NoEmbeddedEngine),
            EngineTransportKind::Process => {
                let command = config
                    .command
                    .clone()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or(TransportError::NoCommand)?;
                Ok(Transport::Process {
                    command,
                    args: config.args.clone(),
                })
            }
        }
    }

    /// Open the channel. Tasks and processes are attached to `runtime`.
    pub fn open(self, runtime: &Handle) -> Result<DuplexChannel, TransportError> {
        match self {
            Transport::Loopback(service) => {
                let (client, server) = tokio::io::duplex(LOOPBACK_BUFFER);
                let (server_read, server_write) = tokio::io::split(server);
                let task = runtime.spawn(rpc::serve(server_read, server_write, service));
                let (reader, writer) = tokio::io::split(client);
                debug!("Opened loopback engine channel");
                Ok(DuplexChannel {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    launcher: Launcher::Loopback(task),
                })
            }
            Transport::Process { command, args } => {
                let _guard = runtime.enter();
                let mut child = Command::new(&command)
                    .args(&args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true)
                    .spawn()
                    .map_err(|source| TransportError::Spawn {
                        command: command.clone(),
                        source,
                    })?;

                let stdin = child
                    .stdin
                    .take()
                    .ok_or(TransportError::MissingPipe("stdin"))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or(TransportError::MissingPipe("stdout"))?;

                info!(command = %command, pid = child.id(), "Spawned engine process");
                Ok(DuplexChannel {
                    reader: Box::new(stdout),
                    writer: Box::new(stdin),
                    launcher: Launcher::Process(child),
                })
            }
        }
    }
}

/// An open channel to the engine.
pub struct DuplexChannel {
    reader: BoxReader,
    writer: BoxWriter,
    launcher: Launcher,
}

impl std::fmt::Debug for DuplexChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexChannel").finish_non_exhaustive()
    }
}

impl DuplexChannel {
    pub fn into_parts(self) -> (BoxReader, BoxWriter, Launcher) {
        (self.reader, self.writer, self.launcher)
    }
}

/// Owner of the far end of a [`DuplexChannel`].
pub enum Launcher {
    Loopback(JoinHandle<()>),
    Process(Child),
}

impl Launcher {
    /// Stop the loopback server task, or reap the engine process (killing it
    /// if it does not exit within a short grace period).
    pub async fn close(self) -> std::io::Result<()> {
        match self {
            Launcher::Loopback(task) => {
                task.abort();
                let _ = task.await;
                debug!("Loopback engine stopped");
                Ok(())
            }
            Launcher::Process(mut child) => {
                match tokio::time::timeout(PROCESS_EXIT_GRACE, child.wait()).await {
                    Ok(status) => {
                        let status = status?;
                        info!(%status, "Engine process exited");
                    }
                    Err(_) => {
                        warn!("Engine process did not exit, killing it");
                        child.kill().await?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxFuture;
    use crate::engine::rpc::ResponseError;
    use serde_json::Value;

    struct Null;

    impl EngineService for Null {
        fn handle_request(
            &self,
            _method: &str,
            _params: Value,
        ) -> BoxFuture<'_, Result<Value, ResponseError>> {
            Box::pin(async { Ok(Value::Null) })
        }

        fn handle_notification(&self, _method: &str, _params: Value) {}
    }

    #[test]
    fn test_loopback_requires_embedded_engine() {
        let config = EngineConfig::default();
        let err = Transport::from_config(&config, None).unwrap_err();
        assert!(matches!(err, TransportError::NoEmbeddedEngine));

        let transport = Transport::from_config(&config, Some(Arc::new(Null))).unwrap();
        assert!(matches!(transport, Transport::Loopback(_)));
    }

    #[test]
    fn test_process_requires_command() {
        let config = EngineConfig {
            transport: EngineTransportKind::Process,
            ..EngineConfig::default()
        };
        let err = Transport::from_config(&config, None).unwrap_err();
        assert!(matches!(err, TransportError::NoCommand));
    }

    #[tokio::test]
    async fn test_spawn_failure_names_command() {
        let transport = Transport::Process {
            command: "/nonexistent/sonar-engine".to_string(),
            args: vec![],
        };
        let err = transport.open(&Handle::current()).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/sonar-engine"));
    }

    #[tokio::test]
    async fn test_loopback_close_stops_server() {
        let channel = Transport::Loopback(Arc::new(Null))
            .open(&Handle::current())
            .unwrap();
        let (_reader, _writer, launcher) = channel.into_parts();
        launcher.close().await.unwrap();
    }
}
