//! Attach and launch commands - run an interactive debug session
//!
//! Both build a [`RunnerConfig`] from the configured runner plus command
//! line overrides, attach a [`Session`] and hand stdin to the console.

use crate::console::{ConsoleCommand, Flow};
use crate::context::CliContext;
use crate::decorations::TerminalDecorations;
use crate::render;
use crate::store::JsonFileStore;
use anyhow::{bail, Context, Result};
use cairn_backend::create_backend;
use cairn_config::constants::{DEFAULT_BACKEND_HOST, DEFAULT_BACKEND_PORT};
use cairn_config::{BackendKind, ConnectionMode, RunnerConfig};
use cairn_session::{Session, SessionEvent, SessionState};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const PROMPT: &str = "(cairn) ";
const PRINTER_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugArgs {
    Attach {
        host: Option<String>,
        port: Option<u16>,
        mi: bool,
    },
    Launch {
        mi: bool,
        port: Option<u16>,
        command: Vec<String>,
    },
}

impl DebugArgs {
    /// Runner for this invocation: `base` with the command line applied.
    pub fn runner(&self, base: &RunnerConfig) -> Result<RunnerConfig> {
        let mut runner = base.clone();
        match self {
            DebugArgs::Attach { host, port, mi } => {
                if *mi {
                    runner.backend = BackendKind::Mi;
                }
                let (base_host, base_port) = base
                    .connection
                    .endpoint()
                    .map(|(h, p)| (h.to_string(), p))
                    .unwrap_or_else(|| (DEFAULT_BACKEND_HOST.to_string(), DEFAULT_BACKEND_PORT));
                runner.connection = ConnectionMode::Attach {
                    host: host.clone().unwrap_or(base_host),
                    port: port.unwrap_or(base_port),
                };
            }
            DebugArgs::Launch { mi, port, command } => {
                if *mi {
                    runner.backend = BackendKind::Mi;
                }
                let Some((program, args)) = command.split_first() else {
                    bail!("launch needs a backend command");
                };
                runner.connection = match port {
                    Some(port) => ConnectionMode::Spawn {
                        command: program.clone(),
                        args: args.to_vec(),
                        cwd: None,
                        env: HashMap::new(),
                        host: DEFAULT_BACKEND_HOST.to_string(),
                        port: *port,
                    },
                    None => ConnectionMode::Stdio {
                        command: program.clone(),
                        args: args.to_vec(),
                        cwd: None,
                        env: HashMap::new(),
                    },
                };
            }
        }
        Ok(runner)
    }
}

pub async fn run(ctx: &CliContext, args: DebugArgs) -> Result<()> {
    let runner = args.runner(&ctx.config.runner)?;
    info!(
        config = %ctx.config_path.display(),
        source = ctx.config_source,
        backend = ?runner.backend,
        "Starting session"
    );

    let backend = create_backend(&runner, &ctx.config.connection);
    let store = Arc::new(JsonFileStore::new(ctx.breakpoints_path()));
    let session = Session::new(
        backend,
        Arc::new(TerminalDecorations::default()),
        store,
        &ctx.config.session,
    );
    let printer = tokio::spawn(print_events(session.subscribe()));

    if let Err(e) = session.restore_breakpoints().await {
        warn!("Could not restore breakpoints: {}", e);
    }
    session
        .attach(&runner)
        .await
        .with_context(|| format!("Failed to attach {} backend", session.backend_name()))?;

    let interrupt = tokio::spawn(interrupt_on_ctrl_c(session.clone()));
    let stdin = BufReader::new(tokio::io::stdin());
    let result = console(&session, stdin, &mut std::io::stdout()).await;

    interrupt.abort();
    if session.state().await.is_attached() {
        if let Err(e) = session.detach().await {
            warn!("Detach failed: {}", e);
        }
    }
    drop(session);
    // the printer ends once the last session handle is gone
    let _ = tokio::time::timeout(PRINTER_DRAIN, printer).await;
    result
}

/// Read commands from `input` until `q` or end of input.
pub async fn console<R, W>(session: &Session, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    loop {
        write!(out, "{}", PROMPT)?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let command: ConsoleCommand = match line.parse() {
            Ok(command) => command,
            Err(e) => {
                writeln!(out, "{}", e)?;
                continue;
            }
        };
        debug!(?command, "Console command");
        match command.execute(session, out).await {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => writeln!(out, "error: {}", e)?,
        }
    }
    Ok(())
}

async fn print_events(mut events: mpsc::Receiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        if let Some(text) = render::event(&event) {
            println!("{}", text);
        }
    }
}

/// Ctrl-C pauses a running debuggee instead of killing the console.
async fn interrupt_on_ctrl_c(session: Session) {
    while tokio::signal::ctrl_c().await.is_ok() {
        if session.state().await == SessionState::Running {
            if let Err(e) = session.suspend().await {
                warn!("Pause failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_overrides_endpoint_and_protocol() {
        let base = RunnerConfig::attach(BackendKind::Dap, "10.0.0.2", 9229);
        let runner = DebugArgs::Attach {
            host: None,
            port: Some(2345),
            mi: true,
        }
        .runner(&base)
        .unwrap();
        assert_eq!(runner.backend, BackendKind::Mi);
        assert_eq!(runner.connection.endpoint(), Some(("10.0.0.2", 2345)));
    }

    #[test]
    fn test_launch_without_port_uses_stdio() {
        let launch = DebugArgs::Launch {
            mi: true,
            port: None,
            command: vec!["gdb".to_string(), "--interpreter=mi2".to_string()],
        };
        let runner = launch.runner(&RunnerConfig::default()).unwrap();
        assert!(matches!(
            runner.connection,
            ConnectionMode::Stdio { ref command, ref args, .. }
                if command == "gdb" && args == &["--interpreter=mi2".to_string()]
        ));
        assert!(!runner.connection.supports_reconnect());
    }

    #[test]
    fn test_launch_with_port_spawns() {
        let launch = DebugArgs::Launch {
            mi: false,
            port: Some(9230),
            command: vec!["node".to_string(), "--inspect-brk={port}".to_string(), "app.js".to_string()],
        };
        let runner = launch.runner(&RunnerConfig::default()).unwrap();
        assert_eq!(runner.connection.spawn_args()[0], "--inspect-brk=9230");
        assert_eq!(runner.connection.endpoint(), Some(("127.0.0.1", 9230)));
    }

    #[test]
    fn test_launch_needs_command() {
        let launch = DebugArgs::Launch {
            mi: false,
            port: None,
            command: Vec::new(),
        };
        assert!(launch.runner(&RunnerConfig::default()).is_err());
    }
}
