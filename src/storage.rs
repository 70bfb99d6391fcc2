//! Run manifests, JSON export and retention of superseded runs.
//!
//! A run directory is considered finished once its `run.json` manifest
//! exists. Pruning only ever looks at finished directories, so runs still in
//! flight (possibly from another process) are never removed.

use crate::model::RunState;
use crate::workspace::{MANIFEST_FILE, RUNS_DIR};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Write the run's manifest into its workspace. Returns `None` for runs
/// without a workspace.
pub fn save_manifest(state: &RunState) -> Result<Option<PathBuf>> {
    let Some(dir) = state.workspace.as_deref() else {
        return Ok(None);
    };
    let path = dir.join(MANIFEST_FILE);
    export_json(&path, state)?;
    Ok(Some(path))
}

pub fn export_json(path: &Path, state: &RunState) -> Result<()> {
    let data = serde_json::to_vec_pretty(state).context("serialize run state")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Finished run directories under `work_root`, newest first.
fn finished_runs(work_root: &Path) -> Result<Vec<PathBuf>> {
    let runs = work_root.join(RUNS_DIR);
    if !runs.exists() {
        return Ok(Vec::new());
    }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(&runs)
        .with_context(|| format!("read {}", runs.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.join(MANIFEST_FILE).is_file())
        .collect();
    // Run ids start with a UTC timestamp, so name order is age order.
    dirs.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(dirs)
}

/// Load the most recent finished runs.
pub fn load_recent(work_root: &Path, limit: usize) -> Result<Vec<RunState>> {
    let mut out = Vec::new();
    for dir in finished_runs(work_root)?.into_iter().take(limit) {
        let path = dir.join(MANIFEST_FILE);
        let data = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        match serde_json::from_slice::<RunState>(&data) {
            Ok(state) => out.push(state),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable manifest"),
        }
    }
    Ok(out)
}

/// Delete finished runs beyond the newest `retain`. `retain == 0` keeps all.
pub fn prune_runs(work_root: &Path, retain: usize) -> Result<Vec<PathBuf>> {
    if retain == 0 {
        return Ok(Vec::new());
    }
    let mut removed = Vec::new();
    for dir in finished_runs(work_root)?.into_iter().skip(retain) {
        std::fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
        tracing::debug!(dir = %dir.display(), "pruned superseded run");
        removed.push(dir);
    }
    Ok(removed)
}
