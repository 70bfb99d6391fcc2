//! Submission entry point: route, dispatch, post-process by track.

use crate::diagram::strip_fences;
use crate::dispatch::dispatch;
use crate::generation::GenerationService;
use crate::model::{
    GenerationResult, InstructionRequest, PipelineStage, RunConfig, RunEvent, RunState,
};
use crate::pipeline::ArtifactPipeline;
use crate::router::route;
use crate::storage;
use crate::workspace::{generate_run_id, RunWorkspace};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Shared, immutable context for submissions.
///
/// Holds no per-run state: every [`Session::submit`] returns a fresh
/// [`RunState`] that the caller owns, so one session can serve concurrent
/// submissions.
pub struct Session {
    cfg: Arc<RunConfig>,
    service: Arc<dyn GenerationService>,
    pipeline: ArtifactPipeline,
}

impl Session {
    pub fn new(cfg: RunConfig, service: Arc<dyn GenerationService>) -> Self {
        let pipeline = ArtifactPipeline::new(&cfg.toolchain, cfg.renderer_timeout);
        Self {
            cfg: Arc::new(cfg),
            service,
            pipeline,
        }
    }

    pub fn with_pipeline(mut self, pipeline: ArtifactPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.cfg
    }

    /// Run one submission to completion.
    ///
    /// Never fails: generation and pipeline errors are recorded on the
    /// returned state with `status = Failed`.
    pub async fn submit(
        &self,
        request: &InstructionRequest,
        event_tx: &UnboundedSender<RunEvent>,
    ) -> RunState {
        let Some(track) = route(&request.task_category) else {
            tracing::info!(category = %request.task_category, "category is not routed");
            let _ = event_tx.send(RunEvent::Unrouted {
                category: request.task_category.to_string(),
            });
            return RunState::unrouted();
        };

        let run_id = generate_run_id();
        tracing::info!(%run_id, %track, "submission routed");
        let _ = event_tx.send(RunEvent::Routed { track });
        let mut state = RunState::started(run_id, track);

        let _ = event_tx.send(RunEvent::GenerationStarted { track });
        let result = dispatch(
            self.service.as_ref(),
            track,
            request,
            self.cfg.generation_timeout,
        )
        .await;
        let _ = event_tx.send(RunEvent::GenerationFinished {
            track,
            ok: result.is_ok(),
        });

        // Every routed run gets a directory for its manifest, failed ones too.
        let run_id = state.run_id.clone().unwrap_or_default();
        let workspace = RunWorkspace::create(&self.cfg.work_root, &run_id).await;

        let result = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(%run_id, error = %e, "generation failed");
                state.workspace = workspace.ok().map(|ws| ws.dir().to_path_buf());
                return state.fail(None, e.to_string());
            }
        };

        match (result, workspace) {
            (GenerationResult::ThreatModel(tm), Err(e)) => {
                state.result = Some(GenerationResult::ThreatModel(tm));
                state.fail(Some(PipelineStage::SourceWritten), format!("{e:#}"))
            }
            (GenerationResult::ThreatModel(tm), Ok(workspace)) => {
                state.workspace = Some(workspace.dir().to_path_buf());
                let mut guard = InterruptGuard::arm(&state);

                let outcome = self.pipeline.run(&workspace, &tm, event_tx).await;
                guard.disarm();
                state.result = Some(GenerationResult::ThreatModel(tm));
                state.artifacts = outcome.artifacts;
                match outcome.error {
                    Some(e) => state.fail(Some(e.stage), e.kind.to_string()),
                    None => state.complete(),
                }
            }
            (result, workspace) => {
                // Code and diagram runs only keep their manifest in the run
                // directory; the result stands without it.
                match workspace {
                    Ok(ws) => state.workspace = Some(ws.dir().to_path_buf()),
                    Err(e) => {
                        let error = format!("{e:#}");
                        tracing::warn!(%run_id, %error, "run directory unavailable");
                    }
                }
                state.result = Some(match result {
                    GenerationResult::Diagram(mut diagram) => {
                        diagram.diagram_code = strip_fences(&diagram.diagram_code).to_string();
                        GenerationResult::Diagram(diagram)
                    }
                    other => other,
                });
                state.complete()
            }
        }
    }
}

/// Writes an interrupted manifest if a run is dropped while its pipeline is
/// still going, so the run directory stays visible to retention.
struct InterruptGuard {
    pending: Option<RunState>,
}

impl InterruptGuard {
    fn arm(state: &RunState) -> Self {
        Self {
            pending: Some(state.clone().fail(None, "run interrupted before it finished")),
        }
    }

    fn disarm(&mut self) {
        self.pending = None;
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        let Some(state) = self.pending.take() else {
            return;
        };
        tracing::info!(run_id = state.run_id.as_deref(), "run interrupted");
        if let Err(e) = storage::save_manifest(&state) {
            let error = format!("{e:#}");
            tracing::warn!(%error, "could not record interrupted run");
        }
    }
}
