//! Breakpoint persistence in a JSON file
//!
//! The file holds a pretty-printed array of breakpoints. Saves go through a
//! sibling temp file and a rename so a crash never leaves half a list.

use async_trait::async_trait;
use cairn_config::paths::ensure_parent_dir;
use cairn_core::{Breakpoint, Error, Result};
use cairn_ports::BreakpointStore;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl BreakpointStore for JsonFileStore {
    async fn load_breakpoints(&self) -> Result<Vec<Breakpoint>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No breakpoint file yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(persistence(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let breakpoints: Vec<Breakpoint> =
            serde_json::from_str(&content).map_err(|e| persistence(&self.path, e))?;
        Ok(breakpoints.into_iter().map(|bp| bp.persisted()).collect())
    }

    async fn save_breakpoints(&self, breakpoints: &[Breakpoint]) -> Result<()> {
        let list: Vec<Breakpoint> = breakpoints
            .iter()
            .filter(|bp| !bp.hidden)
            .map(Breakpoint::persisted)
            .collect();
        let json = serde_json::to_string_pretty(&list).map_err(|e| persistence(&self.path, e))?;

        ensure_parent_dir(&self.path).map_err(|e| persistence(&self.path, e))?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| persistence(&temp, e))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|e| persistence(&self.path, e))?;
        debug!(path = %self.path.display(), count = list.len(), "Saved breakpoints");
        Ok(())
    }
}

fn persistence(path: &Path, err: impl std::fmt::Display) -> Error {
    Error::Persistence(format!("{}: {}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::Location;
    use tempfile::TempDir;

    fn sample() -> Vec<Breakpoint> {
        vec![
            Breakpoint::new("/src/app.js", 4).with_condition("n > 2"),
            Breakpoint::new("/src/app.js", 9)
                .with_id(12)
                .with_actual(Location::new("/src/app.js", 10)),
            Breakpoint::new("/src/lib.js", 1).disabled(),
            Breakpoint::new("/src/lib.js", 30).hidden(),
        ]
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("none.json"));
        assert!(store.load_breakpoints().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_drops_session_fields_and_hidden() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/breakpoints.json"));
        store.save_breakpoints(&sample()).await.unwrap();

        let loaded = store.load_breakpoints().await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(loaded.iter().all(|bp| bp.id.is_none() && !bp.hidden));
        assert_eq!(loaded[0].condition.as_deref(), Some("n > 2"));
        assert!(!loaded[2].enabled);
        assert!(!dir.path().join("nested/breakpoints.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_of_load_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("breakpoints.json");
        let store = JsonFileStore::new(&path);
        store.save_breakpoints(&sample()).await.unwrap();
        let first = std::fs::read_to_string(&path).unwrap();

        let loaded = store.load_breakpoints().await.unwrap();
        store.save_breakpoints(&loaded).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
        assert_eq!(store.load_breakpoints().await.unwrap(), loaded);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_persistence_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("breakpoints.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = JsonFileStore::new(&path).load_breakpoints().await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }
}
