//! Run persistence.
//!
//! Runs are stored in the workspace under:
//! ```text
//! .mend/runs/<run-id>.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::run::PipelineRun;

/// File-backed store of pipeline runs.
#[derive(Debug, Clone)]
pub struct RunStore {
    workspace_root: PathBuf,
}

impl RunStore {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            workspace_root: workspace_root.as_ref().to_path_buf(),
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    fn runs_dir(&self) -> PathBuf {
        self.workspace_root.join(".mend").join("runs")
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{}.json", run_id))
    }

    /// Write the run, replacing any previous copy.
    pub fn save(&self, run: &PipelineRun) -> CoreResult<PathBuf> {
        let dir = self.runs_dir();
        fs::create_dir_all(&dir)?;

        let path = self.run_path(run.id());
        let tmp = dir.join(format!(".{}.json.tmp", run.id()));
        fs::write(&tmp, serde_json::to_string_pretty(run)?)?;
        fs::rename(&tmp, &path)?;

        debug!(run_id = %run.id(), path = %path.display(), "Saved run");
        Ok(path)
    }

    pub fn load(&self, run_id: &str) -> CoreResult<PipelineRun> {
        let path = self.run_path(run_id);
        if !path.exists() {
            return Err(CoreError::RunNotFound(run_id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn exists(&self, run_id: &str) -> bool {
        self.run_path(run_id).exists()
    }

    /// All stored runs, oldest first.
    pub fn list(&self) -> CoreResult<Vec<PipelineRun>> {
        let dir = self.runs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            runs.push(serde_json::from_str::<PipelineRun>(&content)?);
        }
        runs.sort_by_key(|r| r.created_at());
        Ok(runs)
    }

    /// Most recently created run.
    pub fn latest(&self) -> CoreResult<Option<PipelineRun>> {
        Ok(self.list()?.pop())
    }
}
