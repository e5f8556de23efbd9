//! Runner configuration: which backend to drive and how to reach it

use crate::constants::{
    DEFAULT_ADAPTER_ID, DEFAULT_BACKEND_HOST, DEFAULT_BACKEND_PORT, PORT_PLACEHOLDER,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Wire protocol spoken by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Content-Length framed JSON (V8/Node style, Debug Adapter Protocol)
    #[default]
    Dap,
    /// Newline-delimited GDB/MI records
    Mi,
}

/// How the transport reaches the backend process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Spawn the backend, wait for its first output, then connect a socket.
    Spawn {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default = "default_host")]
        host: String,
        #[serde(default = "default_port")]
        port: u16,
    },
    /// Connect to an already-running backend.
    Attach {
        #[serde(default = "default_host")]
        host: String,
        #[serde(default = "default_port")]
        port: u16,
    },
    /// Spawn the backend and speak over its stdin/stdout. Cannot reconnect.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
}

fn default_host() -> String {
    DEFAULT_BACKEND_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_BACKEND_PORT
}

impl Default for ConnectionMode {
    fn default() -> Self {
        ConnectionMode::Attach {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ConnectionMode {
    /// Socket endpoint, if this mode uses one.
    pub fn endpoint(&self) -> Option<(&str, u16)> {
        match self {
            ConnectionMode::Spawn { host, port, .. } | ConnectionMode::Attach { host, port } => {
                Some((host.as_str(), *port))
            }
            ConnectionMode::Stdio { .. } => None,
        }
    }

    /// Whether the socket can be re-established to the same process.
    pub fn supports_reconnect(&self) -> bool {
        self.endpoint().is_some()
    }

    /// Spawn arguments with `{port}` substituted.
    pub fn spawn_args(&self) -> Vec<String> {
        match self {
            ConnectionMode::Spawn { args, port, .. } => args
                .iter()
                .map(|arg| arg.replace(PORT_PLACEHOLDER, &port.to_string()))
                .collect(),
            ConnectionMode::Stdio { args, .. } => args.clone(),
            ConnectionMode::Attach { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub connection: ConnectionMode,
    /// Re-establish the socket to the same process when the host returns
    /// from `away`, instead of ending the session.
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,
    /// Identifier sent to the backend on initialize.
    #[serde(default = "default_adapter_id")]
    pub adapter_id: String,
    /// Program to load (MI backends load it with `-file-exec-and-symbols`).
    #[serde(default)]
    pub program: Option<String>,
}

fn default_reconnect() -> bool {
    true
}

fn default_adapter_id() -> String {
    DEFAULT_ADAPTER_ID.to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            connection: ConnectionMode::default(),
            reconnect: default_reconnect(),
            adapter_id: default_adapter_id(),
            program: None,
        }
    }
}

impl RunnerConfig {
    pub fn attach(backend: BackendKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            backend,
            connection: ConnectionMode::Attach {
                host: host.into(),
                port,
            },
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match &self.connection {
            ConnectionMode::Spawn { command, port, .. } => {
                if command.trim().is_empty() {
                    errors.push("runner.connection.command must not be empty".to_string());
                }
                if *port == 0 {
                    errors.push("runner.connection.port must be greater than 0".to_string());
                }
            }
            ConnectionMode::Attach { port, .. } => {
                if *port == 0 {
                    errors.push("runner.connection.port must be greater than 0".to_string());
                }
            }
            ConnectionMode::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    errors.push("runner.connection.command must not be empty".to_string());
                }
            }
        }
        errors
    }
}
