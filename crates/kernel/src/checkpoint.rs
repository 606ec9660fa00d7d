//! Checkpoint/resume (C8). Per-(stage, target) progress is written
//! atomically under `manifests_root/.checkpoints/<stage>/<target_id>.json`.
//! `--resume` reads the checkpoint back and skips already-completed work;
//! `--no-resume` wipes the stage's checkpoint directory before starting.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::atomic::write_atomic;
use crate::KernelError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub stage: String,
    pub target_id: String,
    pub done: bool,
    /// Stage-specific progress payload (e.g. bytes downloaded, files completed).
    #[serde(default)]
    pub progress: serde_json::Value,
}

pub struct Checkpoint {
    manifests_root: PathBuf,
}

impl Checkpoint {
    pub fn new(manifests_root: impl Into<PathBuf>) -> Self {
        Self {
            manifests_root: manifests_root.into(),
        }
    }

    fn path_for(&self, stage: &str, target_id: &str) -> PathBuf {
        self.manifests_root
            .join(".checkpoints")
            .join(stage)
            .join(format!("{target_id}.json"))
    }

    pub fn load(&self, stage: &str, target_id: &str) -> Result<Option<CheckpointState>, KernelError> {
        let p = self.path_for(stage, target_id);
        if !p.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&p)?;
        let state: CheckpointState = serde_json::from_slice(&bytes).map_err(crate::CanonError::from)?;
        Ok(Some(state))
    }

    pub fn mark(
        &self,
        stage: &str,
        target_id: &str,
        done: bool,
        progress: serde_json::Value,
    ) -> Result<(), KernelError> {
        let state = CheckpointState {
            stage: stage.to_string(),
            target_id: target_id.to_string(),
            done,
            progress,
        };
        let bytes = serde_json::to_vec(&state).map_err(crate::CanonError::from)?;
        write_atomic(self.path_for(stage, target_id), &bytes)
    }

    /// `--no-resume`: wipe all checkpoints for `stage`.
    pub fn reset_stage(&self, stage: &str) -> Result<(), KernelError> {
        let dir = self.manifests_root.join(".checkpoints").join(stage);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// `.part`-suffixed shard/file reclamation helper: returns `true` if a
/// path with the same stem and `.part` suffix exists next to `path`,
/// signalling an interrupted write for the caller to restart.
pub fn has_stale_part(path: &Path) -> bool {
    let part = path.with_file_name(format!(
        "{}.part",
        path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
    ));
    part.exists()
}
