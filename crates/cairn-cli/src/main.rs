//! Cairn CLI - main entry point

use anyhow::Result;
use cairn_cli::commands::{self, debug::DebugArgs};
use cairn_cli::CliContext;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cairn", version, about = "Debugger session console for DAP and GDB/MI backends")]
struct Cli {
    /// Config file (defaults to $CAIRN_CONFIG or ~/.cairn/cairn.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default configuration file
    Init {
        /// Where to write it
        #[arg(long)]
        path: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
    /// Attach to a backend that is already listening
    Attach {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Speak GDB/MI instead of DAP
        #[arg(long)]
        mi: bool,
    },
    /// Start a backend and debug it
    Launch {
        /// Speak GDB/MI instead of DAP
        #[arg(long)]
        mi: bool,

        /// Connect to this port after spawning instead of using stdio;
        /// `{port}` in the command is replaced with it
        #[arg(long)]
        port: Option<u16>,

        /// Backend command line
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Init { path, force } => commands::init::run(path, force),
        Command::Attach { host, port, mi } => {
            let ctx = CliContext::new(cli.config.as_deref())?;
            let _guard = ctx.init_logging(cli.debug)?;
            commands::debug::run(&ctx, DebugArgs::Attach { host, port, mi }).await
        }
        Command::Launch { mi, port, command } => {
            let ctx = CliContext::new(cli.config.as_deref())?;
            let _guard = ctx.init_logging(cli.debug)?;
            commands::debug::run(&ctx, DebugArgs::Launch { mi, port, command }).await
        }
    }
}
