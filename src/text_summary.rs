//! Text summary builder for CLI output.
//!
//! Formats a finished run state as human-readable lines for text mode.

use crate::model::{ArtifactKind, GenerationResult, RunState, RunStatus};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

fn artifact_label(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::RasterImage => "Dataflow diagram",
        ArtifactKind::SequenceImage => "Sequence diagram",
        ArtifactKind::Report => "Report",
    }
}

/// Build a text summary from a run state.
pub(crate) fn build_text_summary(state: &RunState) -> TextSummary {
    let mut lines = Vec::new();

    let Some(track) = state.track else {
        lines.push("No generation track for this category; nothing was generated.".into());
        return TextSummary { lines };
    };

    if let Some(run_id) = state.run_id.as_deref() {
        lines.push(format!("Run: {run_id} ({track})"));
    }

    match state.result.as_ref() {
        Some(GenerationResult::Code(code)) => {
            if !code.explanation.trim().is_empty() {
                lines.push(code.explanation.trim().to_string());
                lines.push(String::new());
            }
            lines.extend(code.code.lines().map(str::to_string));
        }
        Some(GenerationResult::Diagram(diagram)) => {
            if !diagram.diagram_text.trim().is_empty() {
                lines.push(diagram.diagram_text.trim().to_string());
                lines.push(String::new());
            }
            lines.extend(diagram.diagram_code.lines().map(str::to_string));
        }
        Some(GenerationResult::ThreatModel(tm)) => {
            if !tm.diagram_text.trim().is_empty() {
                lines.push(tm.diagram_text.trim().to_string());
            }
        }
        None => {}
    }

    for artifact in &state.artifacts {
        lines.push(format!(
            "{}: {}",
            artifact_label(artifact.kind),
            artifact.path.display()
        ));
    }

    if state.status == RunStatus::Failed {
        lines.push("Generation failed. Please check your input or try again.".into());
        if let Some(failure) = state.failure.as_ref() {
            lines.push(format!("Reason: {}", failure.message));
        }
    }

    TextSummary { lines }
}
