//! Run-scoped working directories.
//!
//! Every routed run owns `<work_root>/runs/<run_id>`; no file name is shared
//! between runs, so concurrent submissions cannot see each other's
//! intermediate files.

use crate::model::ArtifactKind;
use anyhow::{Context, Result};
use rand::RngCore;
use std::path::{Path, PathBuf};
use time::macros::format_description;

pub const RUNS_DIR: &str = "runs";
pub const MANIFEST_FILE: &str = "run.json";

const SOURCE_FILE: &str = "threat_model.py";
const MODEL_FILE: &str = "model.dot";
const REPORT_SOURCE_FILE: &str = "report.md";
const SEQUENCE_SOURCE_FILE: &str = "sequence.puml";
const RASTER_FILE: &str = "dataflow.png";
const SEQUENCE_FILE: &str = "sequence.png";
const REPORT_FILE: &str = "report.html";
const DEFAULT_TEMPLATE_FILE: &str = "report_template.md";

/// Generate a run id: UTC timestamp followed by 64 random bits.
///
/// Ids sort chronologically down to the nanosecond, which the retention
/// policy relies on.
pub fn generate_run_id() -> String {
    let stamp = time::OffsetDateTime::now_utc()
        .format(format_description!(
            "[year][month][day]T[hour][minute][second].[subsecond digits:9]"
        ))
        .unwrap_or_else(|_| "00000000T000000.000000000".into());
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{stamp}-{:016x}", u64::from_le_bytes(b))
}

/// Working directory owned by a single run.
#[derive(Debug, Clone)]
pub struct RunWorkspace {
    run_id: String,
    dir: PathBuf,
}

impl RunWorkspace {
    /// Create the run directory under `work_root`. Fails rather than reuse an
    /// existing directory.
    pub async fn create(work_root: &Path, run_id: &str) -> Result<Self> {
        let runs = work_root.join(RUNS_DIR);
        tokio::fs::create_dir_all(&runs)
            .await
            .with_context(|| format!("create {}", runs.display()))?;
        let dir = runs.join(run_id);
        tokio::fs::create_dir(&dir)
            .await
            .with_context(|| format!("create run directory {}", dir.display()))?;
        Ok(Self {
            run_id: run_id.to_string(),
            dir,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn paths(&self, report_template: Option<&Path>) -> ArtifactPaths {
        ArtifactPaths::new(&self.dir, report_template)
    }
}

/// Concrete file names inside one run directory.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    dir: PathBuf,
    pub source: PathBuf,
    pub model: PathBuf,
    pub report_source: PathBuf,
    pub sequence_source: PathBuf,
    pub raster: PathBuf,
    pub sequence: PathBuf,
    pub report: PathBuf,
    pub template: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: &Path, report_template: Option<&Path>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            source: dir.join(SOURCE_FILE),
            model: dir.join(MODEL_FILE),
            report_source: dir.join(REPORT_SOURCE_FILE),
            sequence_source: dir.join(SEQUENCE_SOURCE_FILE),
            raster: dir.join(RASTER_FILE),
            sequence: dir.join(SEQUENCE_FILE),
            report: dir.join(REPORT_FILE),
            template: report_template
                .map(Path::to_path_buf)
                .unwrap_or_else(|| dir.join(DEFAULT_TEMPLATE_FILE)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::RasterImage => &self.raster,
            ArtifactKind::SequenceImage => &self.sequence,
            ArtifactKind::Report => &self.report,
        }
    }

    /// Whether the report template lives inside the run directory and has to
    /// be written by the pipeline.
    pub fn owns_template(&self) -> bool {
        self.template.starts_with(&self.dir)
    }

    /// Substitute `{placeholder}` names in a command argument.
    pub fn expand(&self, template: &str) -> String {
        let pairs: [(&str, &Path); 9] = [
            ("{dir}", &self.dir),
            ("{source}", &self.source),
            ("{model}", &self.model),
            ("{report_source}", &self.report_source),
            ("{sequence_source}", &self.sequence_source),
            ("{raster}", &self.raster),
            ("{sequence}", &self.sequence),
            ("{report}", &self.report),
            ("{template}", &self.template),
        ];
        let mut out = template.to_string();
        for (key, path) in pairs {
            if out.contains(key) {
                out = out.replace(key, &path.to_string_lossy());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_unique_and_sortable() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), "20260101T000000.000000000-".len() + 16);
        assert!(a[..8].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn run_ids_started_in_the_same_second_keep_their_order() {
        let ids: Vec<String> = (0..5)
            .map(|_| {
                std::thread::sleep(std::time::Duration::from_millis(1));
                generate_run_id()
            })
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(sorted, ids);
    }

    #[tokio::test]
    async fn workspaces_never_share_a_directory() {
        let root = tempfile::tempdir().unwrap();
        let a = RunWorkspace::create(root.path(), &generate_run_id())
            .await
            .unwrap();
        let b = RunWorkspace::create(root.path(), &generate_run_id())
            .await
            .unwrap();
        assert_ne!(a.dir(), b.dir());
        assert!(a.dir().is_dir() && b.dir().is_dir());

        // Reusing an id is refused instead of sharing files.
        assert!(RunWorkspace::create(root.path(), a.run_id()).await.is_err());
    }

    #[test]
    fn placeholders_expand_to_run_paths() {
        let paths = ArtifactPaths::new(Path::new("/w/runs/r1"), None);
        assert_eq!(paths.expand("{source}"), "/w/runs/r1/threat_model.py");
        assert_eq!(
            paths.expand("-o{raster}"),
            "-o/w/runs/r1/dataflow.png"
        );
        assert_eq!(paths.expand("--dfd"), "--dfd");
        assert!(paths.owns_template());

        let custom = ArtifactPaths::new(Path::new("/w/runs/r1"), Some(Path::new("/t/basic.md")));
        assert_eq!(custom.expand("{template}"), "/t/basic.md");
        assert!(!custom.owns_template());
    }
}
