//! Transport: reaching the backend process
//!
//! [`Transport::open`] turns a [`ConnectionMode`] into a reader/writer pair:
//! spawn-then-connect, plain socket attach, or the child's stdio. Socket
//! modes can be reopened to the same process with [`Transport::reconnect`].

mod connection;
mod process;
mod state;

pub use connection::{
    configure_tcp_keepalive, connect_with_retry, reconnect_with_backoff, resolve_host,
};
pub use process::{BackendProcess, ProcessState};
pub use state::{ConnectionState, LinkStatus};

use crate::link::{BoxReader, BoxWriter};
use crate::{Error, Result};
use cairn_config::{ConnectionConfig, ConnectionMode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// The two halves of an open connection.
pub struct Streams {
    pub reader: BoxReader,
    pub writer: BoxWriter,
}

impl Streams {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    fn from_tcp(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }
}

impl std::fmt::Debug for Streams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Streams")
    }
}

#[derive(Debug)]
pub struct Transport {
    mode: ConnectionMode,
    config: ConnectionConfig,
    process: Option<BackendProcess>,
}

impl Transport {
    pub async fn open(mode: &ConnectionMode, config: &ConnectionConfig) -> Result<(Self, Streams)> {
        let (process, streams) = match mode {
            ConnectionMode::Spawn {
                command,
                cwd,
                env,
                host,
                port,
                ..
            } => {
                let mut process =
                    BackendProcess::spawn(command, &mode.spawn_args(), cwd.as_deref(), env)?;
                let banner = process.wait_ready(config.readiness_timeout_ms).await?;
                debug!(%banner, "Backend signalled readiness");
                let stream = connect_with_retry(host, *port, config).await?;
                (Some(process), Streams::from_tcp(stream))
            }
            ConnectionMode::Attach { host, port } => {
                let stream = connect_with_retry(host, *port, config).await?;
                (None, Streams::from_tcp(stream))
            }
            ConnectionMode::Stdio {
                command, cwd, env, ..
            } => {
                let mut process =
                    BackendProcess::spawn(command, &mode.spawn_args(), cwd.as_deref(), env)?;
                let (stdin, stdout) = process.take_stdio().await?;
                (Some(process), Streams::new(stdout, stdin))
            }
        };

        info!(mode = mode_name(mode), "Transport open");
        Ok((
            Self {
                mode: mode.clone(),
                config: config.clone(),
                process,
            },
            streams,
        ))
    }

    pub fn mode(&self) -> &ConnectionMode {
        &self.mode
    }

    pub fn supports_reconnect(&self) -> bool {
        self.mode.supports_reconnect()
    }

    /// Open a fresh socket to the same backend process.
    pub async fn reconnect(&self) -> Result<Streams> {
        let Some((host, port)) = self.mode.endpoint() else {
            return Err(Error::Communication(
                "stdio transports cannot reconnect".to_string(),
            ));
        };
        if !self.is_process_alive().await {
            return Err(Error::session_ended("backend process exited"));
        }
        let stream = reconnect_with_backoff(host, port, &self.config).await?;
        Ok(Streams::from_tcp(stream))
    }

    /// True when there is no owned process (attach mode) or it still runs.
    pub async fn is_process_alive(&self) -> bool {
        match &self.process {
            Some(process) => process.is_running().await,
            None => true,
        }
    }

    pub async fn shutdown(&mut self) {
        if let Some(process) = self.process.take() {
            process.stop(self.config.shutdown_timeout_ms).await;
        }
    }
}

fn mode_name(mode: &ConnectionMode) -> &'static str {
    match mode {
        ConnectionMode::Spawn { .. } => "spawn",
        ConnectionMode::Attach { .. } => "attach",
        ConnectionMode::Stdio { .. } => "stdio",
    }
}
