//! Execution-line decorations for a terminal
//!
//! A terminal has no gutter, so marks become printed lines: the active line
//! is shown with its source text, caller frames are listed below it.

use cairn_ports::EditorDecorations;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Prints marks to a writer (stdout by default). Document lengths come from
/// the file on disk and are cached per path.
pub struct TerminalDecorations {
    out: Mutex<Box<dyn Write + Send>>,
    lengths: Mutex<HashMap<String, Option<u32>>>,
}

impl Default for TerminalDecorations {
    fn default() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl TerminalDecorations {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            lengths: Mutex::new(HashMap::new()),
        }
    }

    /// Forget cached lengths, e.g. after the file changed on disk.
    pub fn invalidate(&self, path: &str) {
        if let Ok(mut lengths) = self.lengths.lock() {
            lengths.remove(path);
        }
    }

    fn print(&self, text: String) {
        if let Ok(mut out) = self.out.lock() {
            // a closed stdout is not worth failing a stop over
            let _ = writeln!(out, "{}", text);
            let _ = out.flush();
        }
    }
}

impl EditorDecorations for TerminalDecorations {
    fn mark_active_line(&self, path: &str, line: u32) {
        let source = source_line(Path::new(path), line).unwrap_or_default();
        self.print(format!("=> {}:{}  {}", path, line + 1, source.trim_end()));
    }

    fn mark_stack_line(&self, path: &str, line: u32) {
        self.print(format!("   called from {}:{}", path, line + 1));
    }

    fn clear_marks(&self, _path: &str) {}

    fn document_length(&self, path: &str) -> Option<u32> {
        let mut lengths = self.lengths.lock().ok()?;
        *lengths
            .entry(path.to_string())
            .or_insert_with(|| line_count(Path::new(path)))
    }
}

fn line_count(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    u32::try_from(content.lines().count()).ok()
}

fn source_line(path: &Path, line: u32) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    content.lines().nth(line as usize).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_active_line_prints_source_text() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.js");
        std::fs::write(&file, "let a = 1;\nlet b = a + 1;\n").unwrap();
        let path = file.to_string_lossy().to_string();

        let buffer = Shared::default();
        let decorations = TerminalDecorations::new(Box::new(buffer.clone()));
        decorations.mark_active_line(&path, 1);
        decorations.mark_stack_line("/src/main.js", 39);

        let printed = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(printed.contains(&format!("=> {}:2  let b = a + 1;", path)));
        assert!(printed.contains("called from /src/main.js:40"));
        assert_eq!(decorations.document_length(&path), Some(2));
        assert_eq!(decorations.document_length("/no/such/file.js"), None);
    }
}
