//! Typed failures of the dispatcher and the artifact pipeline.
//!
//! Both are recovered by the session and recorded on the run state; they
//! never escape a submission.

use crate::model::{PipelineStage, Track};
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

/// The generation service could not produce a usable result.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation service failed: {0:#}")]
    Service(anyhow::Error),

    #[error("generation service did not answer within {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("{track} response could not be decoded: {source}")]
    Decode {
        track: Track,
        #[source]
        source: serde_json::Error,
    },
}

/// A pipeline stage failed; later stages were not attempted.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {kind}")]
pub struct StageError {
    pub stage: PipelineStage,
    #[source]
    pub kind: StageFailureKind,
}

#[derive(Debug, thiserror::Error)]
pub enum StageFailureKind {
    #[error("could not start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}{}", stderr_suffix(.stderr))]
    NonZeroExit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("expected output {} is missing", .0.display())]
    MissingOutput(PathBuf),

    #[error("`{program}` did not finish within {}", humantime::format_duration(*.timeout))]
    Timeout { program: String, timeout: Duration },

    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Last stderr line of a failed renderer, if it printed anything.
fn stderr_suffix(stderr: &str) -> String {
    match stderr.trim().lines().last() {
        Some(line) => format!(": {}", line.trim()),
        None => String::new(),
    }
}

impl StageFailureKind {
    pub fn at(self, stage: PipelineStage) -> StageError {
        StageError { stage, kind: self }
    }
}
