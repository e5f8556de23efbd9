//! Backend process lifecycle

use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Spawned, readiness not yet observed
    Starting,
    Ready,
    Failed,
    ShuttingDown,
    Stopped,
}

/// A spawned backend process with piped stdio.
pub struct BackendProcess {
    command: String,
    child: Arc<Mutex<Option<Child>>>,
    state: Arc<Mutex<ProcessState>>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    drains: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for BackendProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendProcess")
            .field("command", &self.command)
            .field("child", &"<process>")
            .finish()
    }
}

impl BackendProcess {
    pub fn spawn(
        command: &str,
        args: &[String],
        cwd: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        info!("Spawning backend: {} {}", command, args.join(" "));

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Communication(format!("Failed to spawn '{}': {}", command, e)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let mut drains = Vec::new();
        if let Some(stderr) = child.stderr.take() {
            drains.push(drain_lines(stderr, "stderr"));
        }

        Ok(Self {
            command: command.to_string(),
            child: Arc::new(Mutex::new(Some(child))),
            state: Arc::new(Mutex::new(ProcessState::Starting)),
            stdin,
            stdout,
            drains,
        })
    }

    pub async fn state(&self) -> ProcessState {
        *self.state.lock().await
    }

    async fn set_state(&self, state: ProcessState) {
        *self.state.lock().await = state;
    }

    /// Hand the process's stdin/stdout to the caller (stdio transports).
    pub async fn take_stdio(&mut self) -> Result<(ChildStdin, ChildStdout)> {
        let stdin = self
            .stdin
            .take()
            .ok_or_else(|| Error::Communication("Failed to get stdin".to_string()))?;
        let stdout = self
            .stdout
            .take()
            .ok_or_else(|| Error::Communication("Failed to get stdout".to_string()))?;
        self.set_state(ProcessState::Ready).await;
        Ok((stdin, stdout))
    }

    /// Wait for the first line of output, the backend's readiness signal.
    /// Remaining output is drained to the log.
    pub async fn wait_ready(&mut self, timeout_ms: u64) -> Result<String> {
        let stdout = self
            .stdout
            .take()
            .ok_or_else(|| Error::Communication("Failed to get stdout".to_string()))?;
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();

        let outcome =
            tokio::time::timeout(Duration::from_millis(timeout_ms), reader.read_line(&mut line))
                .await;

        match outcome {
            Ok(Ok(0)) => {
                self.set_state(ProcessState::Failed).await;
                Err(Error::Communication(format!(
                    "'{}' exited before signalling readiness",
                    self.command
                )))
            }
            Ok(Ok(_)) => {
                self.drains.push(drain_lines(reader, "stdout"));
                self.set_state(ProcessState::Ready).await;
                Ok(line.trim_end().to_string())
            }
            Ok(Err(e)) => {
                self.set_state(ProcessState::Failed).await;
                Err(e.into())
            }
            Err(_) => {
                self.set_state(ProcessState::Failed).await;
                Err(Error::Communication(format!(
                    "'{}' produced no output within {}ms",
                    self.command, timeout_ms
                )))
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        let mut child = self.child.lock().await;
        match child.as_mut() {
            Some(child) => child.try_wait().unwrap_or(None).is_none(),
            None => false,
        }
    }

    /// Kill the process and wait for it, bounded by `shutdown_timeout_ms`.
    pub async fn stop(&self, shutdown_timeout_ms: u64) {
        {
            let mut state = self.state.lock().await;
            if matches!(*state, ProcessState::ShuttingDown | ProcessState::Stopped) {
                return;
            }
            *state = ProcessState::ShuttingDown;
        }

        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill backend process: {}", e);
            }
            match tokio::time::timeout(Duration::from_millis(shutdown_timeout_ms), child.wait())
                .await
            {
                Ok(Ok(status)) => debug!("Backend process exited with status: {}", status),
                Ok(Err(e)) => warn!("Failed to wait for backend process: {}", e),
                Err(_) => warn!("Backend process did not exit within {}ms", shutdown_timeout_ms),
            }
        }

        self.set_state(ProcessState::Stopped).await;
        info!("Backend stopped: {}", self.command);
    }
}

impl Drop for BackendProcess {
    fn drop(&mut self) {
        for drain in self.drains.drain(..) {
            drain.abort();
        }
        // Best effort: can't await in Drop
        if let Some(mut child) = self.child.try_lock().ok().and_then(|mut c| c.take()) {
            let _ = child.start_kill();
        }
    }
}

fn drain_lines<R>(reader: R, stream: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            trace!(stream, "{}", line);
        }
    })
}
