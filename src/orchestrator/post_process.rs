//! Post-run processing utilities.
//!
//! Persists the run manifest, applies the retention policy and handles the
//! optional JSON export once a submission has finished.

use crate::model::{RunConfig, RunState};
use crate::storage;

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub manifest_path: Option<std::path::PathBuf>,
    pub messages: Vec<String>,
}

/// Process a finished run: write its manifest, prune superseded runs and
/// export JSON if requested. Failures become messages; the run itself is
/// already decided.
pub(crate) fn process_run_completion(cfg: &RunConfig, run: &RunState) -> ProcessedRun {
    let mut messages = Vec::new();

    let manifest_path = match storage::save_manifest(run) {
        Ok(p) => p,
        Err(e) => {
            messages.push(format!("Saving run manifest failed: {e:#}"));
            None
        }
    };

    let pruned = match storage::prune_runs(&cfg.work_root, cfg.retain_runs) {
        Ok(p) => p,
        Err(e) => {
            messages.push(format!("Pruning old runs failed: {e:#}"));
            Vec::new()
        }
    };
    if !pruned.is_empty() {
        messages.push(format!("Removed {} superseded run(s)", pruned.len()));
    }

    if let Some(export_path) = cfg.export_json.as_deref() {
        match storage::export_json(export_path, run) {
            Ok(()) => messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => messages.push(format!("Export JSON failed: {e:#}")),
        }
    }

    ProcessedRun {
        manifest_path,
        messages,
    }
}
