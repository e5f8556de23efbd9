//! The `cairn` binary end to end.

use cairn_config::load_config;
use std::process::Command;
use tempfile::TempDir;

fn cairn() -> Command {
    Command::new(env!("CARGO_BIN_EXE_cairn"))
}

#[test]
fn test_init_writes_loadable_default_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("conf/cairn.toml");

    let output = cairn()
        .args(["init", "--path"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Created configuration file"));

    let config = load_config(&path).unwrap();
    assert_eq!(config.session.persist_debounce_ms, 500);

    // a second run leaves the file alone
    std::fs::write(&path, "[session]\npersist_debounce_ms = 50\n").unwrap();
    let output = cairn().args(["init", "--path"]).arg(&path).output().unwrap();
    assert!(String::from_utf8_lossy(&output.stdout).contains("already exists"));
    assert_eq!(load_config(&path).unwrap().session.persist_debounce_ms, 50);

    let output = cairn()
        .args(["init", "--force", "--path"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(load_config(&path).unwrap().session.persist_debounce_ms, 500);
}

#[test]
fn test_launch_requires_a_command() {
    let output = cairn().arg("launch").output().unwrap();
    assert!(!output.status.success());
}
