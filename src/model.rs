use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub service: ServiceKind,
    pub service_url: String,
    pub model: String,
    /// Never persisted; read from the environment when the config is built.
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(with = "humantime_serde")]
    pub generation_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub renderer_timeout: Duration,
    pub work_root: PathBuf,
    /// Completed runs kept on disk; 0 keeps everything.
    pub retain_runs: usize,
    pub toolchain: RendererToolchain,
    pub brief: bool,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub export_json: Option<PathBuf>,
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// OpenAI-compatible chat completions endpoint
    Chat,
    /// Agent endpoint that accepts the generation request as JSON
    Agent,
}

/// External programs driven by the threat-model pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererToolchain {
    pub python: String,
    pub dot: String,
    pub plantuml: String,
    pub pandoc: String,
    #[serde(default)]
    pub report_template: Option<PathBuf>,
}

impl Default for RendererToolchain {
    fn default() -> Self {
        Self {
            python: "python3".into(),
            dot: "dot".into(),
            plantuml: "plantuml".into(),
            pandoc: "pandoc".into(),
            report_template: None,
        }
    }
}

/// Task category selected alongside the instruction.
///
/// Parsing never fails: anything outside the known set is kept as `Other`
/// and is left unrouted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Python,
    Javascript,
    Flutter,
    Graphviz,
    Pytm,
    Other(String),
}

impl TaskCategory {
    pub fn as_str(&self) -> &str {
        match self {
            TaskCategory::Python => "python",
            TaskCategory::Javascript => "javascript",
            TaskCategory::Flutter => "flutter",
            TaskCategory::Graphviz => "graphviz",
            TaskCategory::Pytm => "pytm",
            TaskCategory::Other(raw) => raw,
        }
    }

    /// Expertise statement used when the caller does not supply one.
    pub fn default_expertise(&self) -> &'static str {
        match self {
            TaskCategory::Python => {
                "You are a senior Python developer. Analyse the request carefully and double-check the solution for consistency before answering."
            }
            TaskCategory::Javascript => {
                "You are a senior Node.js developer. Analyse the request carefully and double-check the solution for consistency before answering."
            }
            TaskCategory::Flutter => {
                "You are a senior Flutter/Dart developer. Analyse the request carefully and double-check the solution for consistency before answering."
            }
            TaskCategory::Graphviz => {
                "You produce Graphviz diagrams of code and processes. Read top to bottom with Start at the top and End at the bottom, put each process in its own cluster and use large readable fonts."
            }
            TaskCategory::Pytm => {
                "You are a pytm threat modelling expert. Produce a complete pytm model of the described system: boundaries, actors, servers, datastores, data and dataflows with protocols and ports. Classifications must be one of UNKNOWN, PUBLIC, RESTRICTED, SENSITIVE, SECRET, TOP_SECRET. The code must start with `from pytm import` and end by calling tm.process() under a __main__ guard."
            }
            TaskCategory::Other(_) => {
                "You are an expert who values consistency and coherence."
            }
        }
    }
}

impl From<&str> for TaskCategory {
    fn from(s: &str) -> Self {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "python" => TaskCategory::Python,
            "javascript" => TaskCategory::Javascript,
            "flutter" => TaskCategory::Flutter,
            // UI labels used by the chat front-end.
            "graphviz" | "diagram" => TaskCategory::Graphviz,
            "pytm" => TaskCategory::Pytm,
            _ => TaskCategory::Other(s.trim().to_string()),
        }
    }
}

impl FromStr for TaskCategory {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TaskCategory::from(s))
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRequest {
    pub instruction: String,
    pub task_category: TaskCategory,
    pub expertise_hint: String,
}

impl InstructionRequest {
    pub fn new(instruction: impl Into<String>, task_category: TaskCategory) -> Self {
        let expertise_hint = task_category.default_expertise().to_string();
        Self {
            instruction: instruction.into(),
            task_category,
            expertise_hint,
        }
    }

    pub fn with_expertise_hint(mut self, hint: impl Into<String>) -> Self {
        self.expertise_hint = hint.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Programming,
    Diagram,
    ThreatModel,
}

impl Track {
    pub fn as_str(self) -> &'static str {
        match self {
            Track::Programming => "programming",
            Track::Diagram => "diagram",
            Track::ThreatModel => "threat_model",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeResult {
    pub explanation: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramResult {
    pub diagram_text: String,
    pub diagram_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatModelResult {
    pub diagram_text: String,
    pub diagram_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationResult {
    Code(CodeResult),
    Diagram(DiagramResult),
    ThreatModel(ThreatModelResult),
}

impl GenerationResult {
    pub fn track(&self) -> Track {
        match self {
            GenerationResult::Code(_) => Track::Programming,
            GenerationResult::Diagram(_) => Track::Diagram,
            GenerationResult::ThreatModel(_) => Track::ThreatModel,
        }
    }
}

/// Stages of the threat-model pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    SourceWritten,
    ModelCompiled,
    RasterRendered,
    SequenceRendered,
    ReportCompiled,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 5] = [
        PipelineStage::SourceWritten,
        PipelineStage::ModelCompiled,
        PipelineStage::RasterRendered,
        PipelineStage::SequenceRendered,
        PipelineStage::ReportCompiled,
    ];

    /// 1-based position in the pipeline.
    pub fn ordinal(self) -> u8 {
        match self {
            PipelineStage::SourceWritten => 1,
            PipelineStage::ModelCompiled => 2,
            PipelineStage::RasterRendered => 3,
            PipelineStage::SequenceRendered => 4,
            PipelineStage::ReportCompiled => 5,
        }
    }

    /// Artifact recorded when this stage succeeds, if any.
    pub fn artifact_kind(self) -> Option<ArtifactKind> {
        match self {
            PipelineStage::RasterRendered => Some(ArtifactKind::RasterImage),
            PipelineStage::SequenceRendered => Some(ArtifactKind::SequenceImage),
            PipelineStage::ReportCompiled => Some(ArtifactKind::Report),
            PipelineStage::SourceWritten | PipelineStage::ModelCompiled => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::SourceWritten => "source",
            PipelineStage::ModelCompiled => "model compile",
            PipelineStage::RasterRendered => "raster render",
            PipelineStage::SequenceRendered => "sequence render",
            PipelineStage::ReportCompiled => "report compile",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    RasterImage,
    SequenceImage,
    Report,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub produced_at: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Empty,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Empty => "empty",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// `None` when the run failed before the pipeline (generation or decode).
    pub stage: Option<PipelineStage>,
    pub message: String,
}

/// Outcome of one submission. Replaced wholesale by the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub timestamp_utc: String,
    pub track: Option<Track>,
    pub result: Option<GenerationResult>,
    pub artifacts: Vec<PipelineArtifact>,
    pub status: RunStatus,
    #[serde(default)]
    pub failure: Option<RunFailure>,
    #[serde(default)]
    pub workspace: Option<PathBuf>,
}

impl RunState {
    /// State for a routed run that has not produced anything yet.
    pub fn started(run_id: String, track: Track) -> Self {
        Self {
            run_id: Some(run_id),
            timestamp_utc: now_rfc3339(),
            track: Some(track),
            ..Default::default()
        }
    }

    /// Terminal state for a category with no track.
    pub fn unrouted() -> Self {
        Self {
            timestamp_utc: now_rfc3339(),
            ..Default::default()
        }
    }

    pub fn is_unrouted(&self) -> bool {
        self.track.is_none() && self.status == RunStatus::Empty
    }

    pub fn fail(mut self, stage: Option<PipelineStage>, message: impl Into<String>) -> Self {
        self.status = RunStatus::Failed;
        self.failure = Some(RunFailure {
            stage,
            message: message.into(),
        });
        self
    }

    pub fn complete(mut self) -> Self {
        self.status = RunStatus::Completed;
        self
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    Unrouted {
        category: String,
    },
    Routed {
        track: Track,
    },
    GenerationStarted {
        track: Track,
    },
    GenerationFinished {
        track: Track,
        ok: bool,
    },
    StageStarted {
        stage: PipelineStage,
    },
    StageCompleted {
        stage: PipelineStage,
        artifact: Option<PipelineArtifact>,
    },
    StageFailed {
        stage: PipelineStage,
        message: String,
    },
    Info(String),
    Cleared,
    RunCompleted {
        state: Box<RunState>,
    },
}

impl RunEvent {
    /// Render a progress line for text output, if the event has one.
    pub fn to_message(&self) -> Option<String> {
        match self {
            RunEvent::Unrouted { category } => Some(format!(
                "No generation track for category '{category}'; nothing to do"
            )),
            RunEvent::Routed { track } => Some(format!("Routed to {track} track")),
            RunEvent::GenerationStarted { .. } => Some("Waiting for generation service…".into()),
            RunEvent::GenerationFinished { ok: true, .. } => Some("Generation finished".into()),
            RunEvent::GenerationFinished { ok: false, .. } => Some("Generation failed".into()),
            RunEvent::StageStarted { stage } => Some(format!("== {stage} ==")),
            RunEvent::StageCompleted {
                artifact: Some(artifact),
                ..
            } => Some(format!("Wrote {}", artifact.path.display())),
            RunEvent::StageCompleted { .. } => None,
            RunEvent::StageFailed { stage, message } => {
                Some(format!("{stage} stage failed: {message}"))
            }
            RunEvent::Info(msg) => Some(msg.clone()),
            RunEvent::Cleared => Some("Cleared".into()),
            RunEvent::RunCompleted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parsing_is_case_insensitive_and_accepts_ui_labels() {
        assert_eq!("Python".parse::<TaskCategory>().unwrap(), TaskCategory::Python);
        assert_eq!(" JAVASCRIPT ".parse::<TaskCategory>().unwrap(), TaskCategory::Javascript);
        assert_eq!("Diagram".parse::<TaskCategory>().unwrap(), TaskCategory::Graphviz);
        assert_eq!("PyTM".parse::<TaskCategory>().unwrap(), TaskCategory::Pytm);
        assert_eq!(
            "General".parse::<TaskCategory>().unwrap(),
            TaskCategory::Other("General".into())
        );
    }

    #[test]
    fn request_defaults_hint_from_category() {
        let req = InstructionRequest::new("draw it", TaskCategory::Graphviz);
        assert!(req.expertise_hint.contains("Graphviz"));

        let req = req.with_expertise_hint("custom");
        assert_eq!(req.expertise_hint, "custom");
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut state = RunState::started("r1".into(), Track::Diagram).complete();
        state.clear();
        assert_eq!(state.status, RunStatus::Empty);
        assert!(state.track.is_none());
        assert!(state.artifacts.is_empty());
    }

    #[test]
    fn only_render_stages_produce_artifacts() {
        let produced: Vec<_> = PipelineStage::ALL
            .iter()
            .filter_map(|s| s.artifact_kind())
            .collect();
        assert_eq!(
            produced,
            vec![
                ArtifactKind::RasterImage,
                ArtifactKind::SequenceImage,
                ArtifactKind::Report
            ]
        );
    }

    #[test]
    fn run_state_survives_json() {
        let mut state = RunState::started("r2".into(), Track::ThreatModel);
        state.result = Some(GenerationResult::ThreatModel(ThreatModelResult {
            diagram_text: "t".into(),
            diagram_code: "c".into(),
        }));
        let state = state.fail(Some(PipelineStage::RasterRendered), "dot exited with 1");
        let json = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
