//! Init command - write the default configuration file
//!
//! Path resolution priority:
//! 1. `--path <custom>`
//! 2. `CAIRN_CONFIG` environment variable
//! 3. `$CAIRN_HOME/cairn.toml`, `~/.cairn/cairn.toml` by default

use anyhow::{Context, Result};
use cairn_config::{create_config, paths::default_config_path};
use std::path::PathBuf;

pub fn run(path: Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = path.unwrap_or_else(default_config_path);

    if config_path.exists() && !force {
        println!("Configuration file already exists at:");
        println!("  {}", config_path.display());
        println!();
        println!("Use --force to overwrite it with the defaults.");
        return Ok(());
    }

    if config_path.exists() {
        std::fs::remove_file(&config_path).with_context(|| {
            format!("Failed to remove existing config at {}", config_path.display())
        })?;
    }

    let created = create_config(&config_path)
        .with_context(|| format!("Failed to create config at {}", config_path.display()))?;

    println!("Created configuration file:");
    println!(
        "  {}",
        created
            .canonicalize()
            .unwrap_or_else(|_| created.clone())
            .display()
    );
    println!();
    println!("Attach to a running backend with:");
    println!("  cairn attach --port 9229");
    Ok(())
}
