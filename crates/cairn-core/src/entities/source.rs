use serde::{Deserialize, Serialize};

/// A script or compilation unit known to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Backend reference id.
    pub id: i64,
    pub path: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub line_offset: u32,
    /// Internal to the runtime rather than user code.
    #[serde(default)]
    pub debug: bool,
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Source {
    pub fn new(id: i64, path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(path.as_str())
            .to_string();
        Self {
            id,
            path,
            name,
            text: None,
            line_offset: 0,
            debug: false,
        }
    }
}
