//! Output workspace layout and atomic persistence.
//!
//! ```text
//! <root>/
//!   vectorization_results.json
//!   results/<function>.json
//!   attempts/<function>/prompt_<i>.txt, attempt_<i>.json, ...
//!   scratch/            per-verification build directories
//! ```

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

pub const AGGREGATE_FILE: &str = "vectorization_results.json";

/// Owns the output root and its layout for one run.
#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    root: PathBuf,
}

impl WorkspaceContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn attempts_dir(&self, function: &str) -> PathBuf {
        self.root.join("attempts").join(function)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("scratch")
    }

    pub fn aggregate_path(&self) -> PathBuf {
        self.root.join(AGGREGATE_FILE)
    }

    pub fn result_path(&self, function: &str) -> PathBuf {
        self.results_dir().join(format!("{}.json", function))
    }

    /// Create the layout. With `clean`, outputs of a previous run are removed first.
    pub fn prepare(&self, clean: bool) -> io::Result<()> {
        if clean {
            for stale in [
                self.results_dir(),
                self.root.join("attempts"),
                self.scratch_dir(),
            ] {
                if stale.exists() {
                    std::fs::remove_dir_all(&stale)?;
                    debug!(path = %stale.display(), "Removed previous output");
                }
            }
            let aggregate = self.aggregate_path();
            if aggregate.exists() {
                std::fs::remove_file(&aggregate)?;
            }
        }
        std::fs::create_dir_all(self.results_dir())?;
        std::fs::create_dir_all(self.root.join("attempts"))?;
        std::fs::create_dir_all(self.scratch_dir())?;
        info!(root = %self.root.display(), clean, "Workspace prepared");
        Ok(())
    }

    /// Remove the scratch directory unless it should be kept for inspection.
    pub fn finish(&self, preserve_scratch: bool) -> io::Result<()> {
        let scratch = self.scratch_dir();
        if !preserve_scratch && scratch.exists() {
            std::fs::remove_dir_all(&scratch)?;
        }
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write bytes to `path` through a temporary sibling and a rename.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(path);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn write_text(path: &Path, text: &str) -> io::Result<()> {
    atomic_write(path, text.as_bytes())
}

/// Pretty-printed JSON, written atomically.
pub fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// `Ok(None)` if the file does not exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_creates_layout() {
        let dir = TempDir::new().unwrap();
        let ws = WorkspaceContext::new(dir.path().join("out"));
        ws.prepare(false).unwrap();
        assert!(ws.results_dir().is_dir());
        assert!(ws.scratch_dir().is_dir());
        assert!(ws.root().join("attempts").is_dir());
        assert_eq!(ws.result_path("s000"), ws.results_dir().join("s000.json"));
    }

    #[test]
    fn test_prepare_clean_removes_previous_outputs() {
        let dir = TempDir::new().unwrap();
        let ws = WorkspaceContext::new(dir.path());
        ws.prepare(false).unwrap();
        write_text(&ws.result_path("s000"), "{}").unwrap();
        write_text(&ws.aggregate_path(), "{}").unwrap();
        write_text(&dir.path().join("notes.md"), "keep").unwrap();

        ws.prepare(true).unwrap();
        assert!(!ws.result_path("s000").exists());
        assert!(!ws.aggregate_path().exists());
        assert!(dir.path().join("notes.md").exists());
    }

    #[test]
    fn test_finish_respects_preserve() {
        let dir = TempDir::new().unwrap();
        let ws = WorkspaceContext::new(dir.path());
        ws.prepare(false).unwrap();
        ws.finish(true).unwrap();
        assert!(ws.scratch_dir().exists());
        ws.finish(false).unwrap();
        assert!(!ws.scratch_dir().exists());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("attempts").join("s000").join("attempt_1.json");
        write_json(&path, &vec![1, 2, 3]).unwrap();
        assert!(!temp_sibling(&path).exists());
        let loaded: Option<Vec<u32>> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_temp_sibling_keeps_extension() {
        assert_eq!(
            temp_sibling(Path::new("/x/attempt_1.json")),
            PathBuf::from("/x/attempt_1.json.tmp")
        );
    }

    #[test]
    fn test_load_json_missing() {
        let loaded: Option<u32> = load_json(Path::new("/nonexistent/vecsmith.json")).unwrap();
        assert!(loaded.is_none());
    }
}
