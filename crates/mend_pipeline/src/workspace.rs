//! Workspace snapshots and change application.

use std::fs;
use std::path::{Component, Path, PathBuf};

use mend_agents::{FileChange, RepoSnapshot};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::{PipelineError, PipelineResult};

/// Directories never included in a snapshot.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "__pycache__", "venv"];

/// Files larger than this are left out of snapshots.
const MAX_FILE_BYTES: u64 = 512 * 1024;

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
}

/// Read every UTF-8 text file under `root`, keyed by `/`-separated relative path.
pub fn snapshot(root: &Path) -> PipelineResult<RepoSnapshot> {
    let mut repo = RepoSnapshot::new();
    let walker = WalkDir::new(root).sort_by_file_name().into_iter();

    for entry in walker.filter_entry(|e| !is_skipped(e)) {
        let entry = entry.map_err(|e| PipelineError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
            continue;
        }
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        repo.insert(key, content);
    }

    debug!(root = %root.display(), files = repo.len(), "Workspace snapshot taken");
    Ok(repo)
}

/// Resolve a change path inside `root`, refusing anything that escapes it.
pub fn resolve_path(root: &Path, path: &str) -> PipelineResult<PathBuf> {
    let relative = Path::new(path);
    let safe = !path.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe {
        return Err(PipelineError::UnsafePath(path.to_string()));
    }
    Ok(root.join(relative))
}

/// Write full-file replacements under `root`.
pub fn apply_changes(root: &Path, changes: &[FileChange]) -> PipelineResult<Vec<PathBuf>> {
    // Validate everything before touching the disk.
    let targets = changes
        .iter()
        .map(|c| resolve_path(root, &c.path))
        .collect::<PipelineResult<Vec<_>>>()?;

    for (target, change) in targets.iter().zip(changes) {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, &change.content)?;
        debug!(path = %change.path, "Wrote file");
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_snapshot_skips_hidden_and_build_dirs() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::create_dir_all(dir.path().join("__pycache__")).unwrap();
        fs::write(dir.path().join("calc.py"), "x = 1").unwrap();
        fs::write(dir.path().join("pkg/test_calc.py"), "def test(): pass").unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        fs::write(dir.path().join("__pycache__/calc.pyc"), "junk").unwrap();

        let repo = snapshot(dir.path()).unwrap();
        let paths: Vec<&str> = repo.paths().collect();
        assert_eq!(paths, vec!["calc.py", "pkg/test_calc.py"]);
    }

    #[test]
    fn test_apply_changes_rejects_escaping_paths() {
        let dir = tempdir().unwrap();
        for bad in ["../evil.py", "/etc/passwd", ""] {
            let result = apply_changes(dir.path(), &[FileChange::new(bad, "x")]);
            assert!(matches!(result, Err(PipelineError::UnsafePath(_))), "{}", bad);
        }
    }

    #[test]
    fn test_apply_changes_is_all_or_nothing() {
        let dir = tempdir().unwrap();
        let result = apply_changes(
            dir.path(),
            &[
                FileChange::new("ok.py", "x = 1"),
                FileChange::new("../bad.py", "x = 2"),
            ],
        );
        assert!(result.is_err());
        assert!(!dir.path().join("ok.py").exists());

        apply_changes(dir.path(), &[FileChange::new("pkg/new.py", "y = 2")]).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("pkg/new.py")).unwrap(), "y = 2");
    }
}
