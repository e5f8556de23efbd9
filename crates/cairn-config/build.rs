//! Build script for cairn-config
//!
//! Embeds the default config template from the workspace root so that
//! `cairn init` can write it without the source tree present.

use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");
    let workspace_root = PathBuf::from(&manifest_dir)
        .parent() // crates/
        .and_then(|p| p.parent()) // workspace root
        .expect("Could not find workspace root")
        .to_path_buf();

    let config_path = workspace_root.join("cairn.toml");
    let config = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        panic!(
            "Failed to read default config at {}: {}",
            config_path.display(),
            e
        )
    });

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = PathBuf::from(&out_dir).join("embedded_config.rs");

    let content = format!(
        r####"/// Default configuration template embedded at compile time
/// Source: cairn.toml (workspace root)
pub const DEFAULT_CONFIG: &str = r###"{}"###;
"####,
        config
    );

    fs::write(&dest_path, content).expect("Could not write embedded_config.rs");

    println!("cargo:rerun-if-changed={}", config_path.display());
    println!("cargo:rerun-if-changed=build.rs");
}
