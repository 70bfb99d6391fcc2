//! Threat-model artifact pipeline.
//!
//! A strictly sequential, fail-fast state machine:
//!
//! `Start → SourceWritten → ModelCompiled → RasterRendered → SequenceRendered
//! → ReportCompiled → Done`, with `Failed(stage)` absorbing any failure.
//!
//! Each stage runs only after the previous one reported success. Artifacts
//! are appended in stage order and never removed, so a failed run keeps
//! exactly the artifacts of the stages that completed.

mod invocation;

pub use invocation::Invocation;

use crate::diagram::strip_fences;
use crate::error::{StageError, StageFailureKind};
use crate::model::{
    PipelineArtifact, PipelineStage, RendererToolchain, RunEvent, ThreatModelResult,
};
use crate::workspace::{ArtifactPaths, RunWorkspace};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Report template written into the run directory when none is configured.
const DEFAULT_REPORT_TEMPLATE: &str = r#"# {tm.name}

{tm.description}

## Assumptions

{tm.assumptions:repeat:- {{item}}
}

## Dataflows

{dataflows:repeat:- **{{item.name}}**: {{item.source.name}} → {{item.sink.name}} ({{item.protocol}})
}

## Potential threats

{findings:repeat:### {{item.id}} {{item.description}}

Target: {{item.target}}

Severity: {{item.severity}}

{{item.mitigations}}

}
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    SourceWritten,
    ModelCompiled,
    RasterRendered,
    SequenceRendered,
    ReportCompiled,
    Done,
    Failed(PipelineStage),
}

impl PipelineState {
    /// The stage that moves the machine out of this state, if any.
    pub fn next_stage(self) -> Option<PipelineStage> {
        match self {
            PipelineState::Start => Some(PipelineStage::SourceWritten),
            PipelineState::SourceWritten => Some(PipelineStage::ModelCompiled),
            PipelineState::ModelCompiled => Some(PipelineStage::RasterRendered),
            PipelineState::RasterRendered => Some(PipelineStage::SequenceRendered),
            PipelineState::SequenceRendered => Some(PipelineStage::ReportCompiled),
            PipelineState::ReportCompiled | PipelineState::Done | PipelineState::Failed(_) => None,
        }
    }

    /// State reached once `stage` succeeds.
    pub fn after(stage: PipelineStage) -> Self {
        match stage {
            PipelineStage::SourceWritten => PipelineState::SourceWritten,
            PipelineStage::ModelCompiled => PipelineState::ModelCompiled,
            PipelineStage::RasterRendered => PipelineState::RasterRendered,
            PipelineStage::SequenceRendered => PipelineState::SequenceRendered,
            PipelineStage::ReportCompiled => PipelineState::ReportCompiled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed(_))
    }
}

/// Commands executed by each process-backed stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    pub compile: Vec<Invocation>,
    pub raster: Vec<Invocation>,
    pub sequence: Vec<Invocation>,
    pub report: Vec<Invocation>,
}

impl StagePlan {
    /// pytm + Graphviz + PlantUML + pandoc.
    pub fn from_toolchain(tools: &RendererToolchain) -> Self {
        Self {
            compile: vec![
                Invocation::new(&tools.python, ["{source}", "--dfd"]).stdout_to("{model}"),
                Invocation::new(&tools.python, ["{source}", "--report", "{template}"])
                    .stdout_to("{report_source}"),
            ],
            raster: vec![Invocation::new(&tools.dot, ["-Tpng", "-o", "{raster}", "{model}"])
                .produces("{raster}")],
            sequence: vec![
                Invocation::new(&tools.python, ["{source}", "--seq"])
                    .stdout_to("{sequence_source}"),
                Invocation::new(&tools.plantuml, ["-tpng", "-pipe"])
                    .stdin_from("{sequence_source}")
                    .stdout_to("{sequence}"),
            ],
            report: vec![Invocation::new(
                &tools.pandoc,
                [
                    "-f",
                    "markdown",
                    "-t",
                    "html",
                    "--standalone",
                    "--metadata",
                    "title=Threat model",
                    "-o",
                    "{report}",
                    "{report_source}",
                ],
            )
            .produces("{report}")],
        }
    }

    fn invocations(&self, stage: PipelineStage) -> &[Invocation] {
        match stage {
            PipelineStage::SourceWritten => &[],
            PipelineStage::ModelCompiled => &self.compile,
            PipelineStage::RasterRendered => &self.raster,
            PipelineStage::SequenceRendered => &self.sequence,
            PipelineStage::ReportCompiled => &self.report,
        }
    }
}

/// What a pipeline run leaves behind.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub state: PipelineState,
    pub artifacts: Vec<PipelineArtifact>,
    pub error: Option<StageError>,
}

pub struct ArtifactPipeline {
    plan: StagePlan,
    report_template: Option<PathBuf>,
    timeout: Duration,
}

impl ArtifactPipeline {
    pub fn new(tools: &RendererToolchain, timeout: Duration) -> Self {
        Self {
            plan: StagePlan::from_toolchain(tools),
            report_template: tools.report_template.clone(),
            timeout,
        }
    }

    /// Pipeline driven by an explicit plan instead of the default toolchain.
    pub fn with_plan(plan: StagePlan, timeout: Duration) -> Self {
        Self {
            plan,
            report_template: None,
            timeout,
        }
    }

    /// Run every stage in order inside `workspace`, stopping at the first
    /// failure.
    pub async fn run(
        &self,
        workspace: &RunWorkspace,
        result: &ThreatModelResult,
        event_tx: &UnboundedSender<RunEvent>,
    ) -> PipelineOutcome {
        let paths = workspace.paths(self.report_template.as_deref());
        let mut state = PipelineState::Start;
        let mut artifacts = Vec::new();

        while let Some(stage) = state.next_stage() {
            let _ = event_tx.send(RunEvent::StageStarted { stage });
            tracing::info!(run_id = workspace.run_id(), %stage, "stage started");

            if let Err(e) = self.run_stage(stage, &paths, result).await {
                tracing::warn!(run_id = workspace.run_id(), %stage, error = %e.kind, "stage failed");
                let _ = event_tx.send(RunEvent::StageFailed {
                    stage,
                    message: e.kind.to_string(),
                });
                return PipelineOutcome {
                    state: PipelineState::Failed(stage),
                    artifacts,
                    error: Some(e),
                };
            }

            let artifact = stage.artifact_kind().map(|kind| PipelineArtifact {
                kind,
                path: paths.artifact(kind).to_path_buf(),
                produced_at: stage.ordinal(),
            });
            if let Some(a) = &artifact {
                artifacts.push(a.clone());
            }
            let _ = event_tx.send(RunEvent::StageCompleted { stage, artifact });
            state = PipelineState::after(stage);
        }

        debug_assert_eq!(state, PipelineState::ReportCompiled);
        PipelineOutcome {
            state: PipelineState::Done,
            artifacts,
            error: None,
        }
    }

    async fn run_stage(
        &self,
        stage: PipelineStage,
        paths: &ArtifactPaths,
        result: &ThreatModelResult,
    ) -> Result<(), StageError> {
        if stage == PipelineStage::SourceWritten {
            return write_source(paths, result).await.map_err(|k| k.at(stage));
        }
        for inv in self.plan.invocations(stage) {
            inv.run(paths, self.timeout).await.map_err(|k| k.at(stage))?;
        }
        Ok(())
    }
}

async fn write_source(paths: &ArtifactPaths, result: &ThreatModelResult) -> Result<(), StageFailureKind> {
    let source = strip_fences(&result.diagram_code);
    write_file(&paths.source, source).await?;
    if paths.owns_template() {
        write_file(&paths.template, DEFAULT_REPORT_TEMPLATE).await?;
    }
    Ok(())
}

async fn write_file(path: &std::path::Path, contents: &str) -> Result<(), StageFailureKind> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| StageFailureKind::Io {
            path: path.to_path_buf(),
            source,
        })
}
