use crate::generation;
use crate::model::{InstructionRequest, RunConfig, RunEvent, RunState, RunStatus, ServiceKind, TaskCategory};
use crate::orchestrator::{process_run_completion, run_controller, UiCommand};
use crate::session::Session;
use crate::text_summary::build_text_summary;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::{IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "jarvis",
    version,
    about = "Route instructions to generation tracks and render threat-model artifacts"
)]
pub struct Cli {
    /// Task category: python, javascript, flutter, graphviz (diagram) or pytm
    #[arg(long, short = 'c', default_value = "python")]
    pub category: String,

    /// Instruction text; read from stdin when omitted and stdin is not a terminal
    #[arg(long, short = 'i')]
    pub instruction: Option<String>,

    /// Override the expertise statement sent with the instruction
    #[arg(long)]
    pub expertise: Option<String>,

    /// Generation service flavour
    #[arg(long, value_enum, default_value_t = ServiceKind::Chat)]
    pub service: ServiceKind,

    /// Base URL (chat) or endpoint URL (agent) of the generation service
    #[arg(long, default_value = "https://api.openai.com/v1")]
    pub service_url: String,

    /// Model name sent to the chat service
    #[arg(long, default_value = "gpt-4o-mini")]
    pub model: String,

    /// Environment variable holding the service API key
    #[arg(long, default_value = "OPENAI_API_KEY")]
    pub api_key_env: String,

    /// Ask for brief answers
    #[arg(long)]
    pub brief: bool,

    /// Extra instructions appended to the expertise statement
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Timeout for the generation service call
    #[arg(long, default_value = "120s")]
    pub generation_timeout: humantime::Duration,

    /// Timeout for each renderer invocation
    #[arg(long, default_value = "60s")]
    pub renderer_timeout: humantime::Duration,

    /// Root directory for run workspaces (default: <data dir>/jarvis)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Completed runs to keep on disk (0 keeps everything)
    #[arg(long, default_value_t = 5)]
    pub retain_runs: usize,

    /// Python interpreter used to compile pytm models
    #[arg(long, default_value = "python3")]
    pub python: String,

    /// Graphviz `dot` executable
    #[arg(long, default_value = "dot")]
    pub dot: String,

    /// PlantUML executable
    #[arg(long, default_value = "plantuml")]
    pub plantuml: String,

    /// pandoc executable
    #[arg(long, default_value = "pandoc")]
    pub pandoc: String,

    /// pytm report template (a built-in template is used when omitted)
    #[arg(long)]
    pub report_template: Option<PathBuf>,

    /// Print the run state as JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// Export the run state as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// List the N most recent finished runs and exit
    #[arg(long, value_name = "N")]
    pub history: Option<usize>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Run the CLI. Returns the status of the submission (`Empty` when nothing
/// was submitted).
pub async fn run(args: Cli) -> Result<RunStatus> {
    let cfg = build_config(&args);

    if let Some(limit) = args.history {
        print_history(&cfg, limit)?;
        return Ok(RunStatus::Empty);
    }

    if cfg.service == ServiceKind::Chat && cfg.api_key.is_none() {
        tracing::warn!(var = %args.api_key_env, "no API key in environment; sending unauthenticated requests");
    }
    let service = generation::build_service(&cfg)?;
    let session = Arc::new(Session::new(cfg, service));

    match read_instruction(&args)? {
        Some(instruction) => run_once(&args, session, instruction).await,
        None => {
            run_interactive(&args, session).await?;
            Ok(RunStatus::Empty)
        }
    }
}

/// Default work root: `<local data dir>/jarvis`, falling back to the temp dir.
fn default_work_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("jarvis")
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        service: args.service,
        service_url: args.service_url.clone(),
        model: args.model.clone(),
        api_key: std::env::var(&args.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty()),
        generation_timeout: Duration::from(args.generation_timeout),
        renderer_timeout: Duration::from(args.renderer_timeout),
        work_root: args.work_dir.clone().unwrap_or_else(default_work_root),
        retain_runs: args.retain_runs,
        toolchain: crate::model::RendererToolchain {
            python: args.python.clone(),
            dot: args.dot.clone(),
            plantuml: args.plantuml.clone(),
            pandoc: args.pandoc.clone(),
            report_template: args.report_template.clone(),
        },
        brief: args.brief,
        system_prompt: args.system_prompt.clone(),
        export_json: args.export_json.clone(),
        user_agent: format!("jarvis/{}", env!("CARGO_PKG_VERSION")),
    }
}

fn build_request(args: &Cli, category: TaskCategory, instruction: String) -> InstructionRequest {
    let request = InstructionRequest::new(instruction, category);
    match args.expertise.as_deref() {
        Some(hint) => request.with_expertise_hint(hint),
        None => request,
    }
}

/// Instruction from `--instruction` or piped stdin; `None` means interactive.
fn read_instruction(args: &Cli) -> Result<Option<String>> {
    if let Some(text) = args.instruction.as_deref() {
        anyhow::ensure!(!text.trim().is_empty(), "--instruction is empty");
        return Ok(Some(text.to_string()));
    }
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut text = String::new();
    stdin
        .lock()
        .read_to_string(&mut text)
        .context("read instruction from stdin")?;
    anyhow::ensure!(!text.trim().is_empty(), "no instruction on stdin");
    Ok(Some(text))
}

/// One `--history` row: id, track, status, artifact count, run directory.
fn history_line(run: &RunState) -> String {
    format!(
        "{}  {}  {}  {} artifact(s)  {}",
        run.run_id.as_deref().unwrap_or("-"),
        run.track.map(|t| t.as_str()).unwrap_or("-"),
        run.status,
        run.artifacts.len(),
        run.workspace
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    )
}

fn print_history(cfg: &RunConfig, limit: usize) -> Result<()> {
    let runs = crate::storage::load_recent(&cfg.work_root, limit)
        .context("failed to load run history")?;
    if runs.is_empty() {
        println!("No finished runs in {}", cfg.work_root.display());
    }
    for r in &runs {
        println!("{}", history_line(r));
    }
    Ok(())
}

/// Submit a single instruction and print its outcome.
async fn run_once(args: &Cli, session: Arc<Session>, instruction: String) -> Result<RunStatus> {
    let request = build_request(args, TaskCategory::from(args.category.as_str()), instruction);
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();

    let progress_tx = out_tx.clone();
    let progress = tokio::spawn(async move {
        while let Some(ev) = evt_rx.recv().await {
            if let Some(msg) = ev.to_message() {
                let _ = progress_tx.send(OutputLine::Stderr(msg));
            }
        }
    });

    // Ctrl-C drops the submission, which kills any renderer still running.
    let state = tokio::select! {
        state = session.submit(&request, &evt_tx) => state,
        _ = tokio::signal::ctrl_c() => {
            anyhow::bail!("interrupted");
        }
    };
    drop(evt_tx);
    let _ = progress.await;

    let processed = process_run_completion(session.config(), &state);
    for msg in processed.messages {
        let _ = out_tx.send(OutputLine::Stderr(msg));
    }
    if let Some(p) = processed.manifest_path {
        let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
    }

    if args.json {
        let out = serde_json::to_string_pretty(&state)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        for line in build_text_summary(&state).lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(state.status)
}

/// One line typed in interactive mode.
#[derive(Debug, PartialEq, Eq)]
enum InputLine {
    Empty,
    Submit(String),
    Category(TaskCategory),
    Clear,
    Help,
    Quit,
}

fn parse_input_line(line: &str) -> InputLine {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return InputLine::Empty;
    }
    let Some(command) = trimmed.strip_prefix(':') else {
        return InputLine::Submit(trimmed.to_string());
    };
    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    match name {
        "clear" => InputLine::Clear,
        "quit" | "q" | "exit" => InputLine::Quit,
        "category" | "c" if !rest.trim().is_empty() => {
            InputLine::Category(TaskCategory::from(rest))
        }
        _ => InputLine::Help,
    }
}

const INTERACTIVE_HELP: &str =
    "Type an instruction and press enter. Commands: :category <name>, :clear, :quit";

/// Read stdin lines and turn them into controller commands.
async fn read_commands(
    args: Cli,
    cmd_tx: mpsc::UnboundedSender<UiCommand>,
    out_tx: mpsc::UnboundedSender<OutputLine>,
) {
    let mut category = TaskCategory::from(args.category.as_str());
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_input_line(&line) {
            InputLine::Empty => {}
            InputLine::Submit(text) => {
                let request = build_request(&args, category.clone(), text);
                let _ = cmd_tx.send(UiCommand::Submit(request));
            }
            InputLine::Category(c) => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Category: {c}")));
                category = c;
            }
            InputLine::Clear => {
                let _ = cmd_tx.send(UiCommand::Clear);
            }
            InputLine::Help => {
                let _ = out_tx.send(OutputLine::Stderr(INTERACTIVE_HELP.into()));
            }
            InputLine::Quit => break,
        }
    }
    let _ = cmd_tx.send(UiCommand::Quit);
}

async fn run_interactive(args: &Cli, session: Arc<Session>) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let controller = tokio::spawn(run_controller(session, evt_tx, cmd_rx));
    let reader = tokio::spawn(read_commands(args.clone(), cmd_tx, out_tx.clone()));
    let _ = out_tx.send(OutputLine::Stderr(format!(
        "{INTERACTIVE_HELP} (category: {})",
        args.category
    )));

    // The single current run, replaced wholesale by each completion.
    let mut current = RunState::default();
    while let Some(ev) = evt_rx.recv().await {
        match ev {
            RunEvent::RunCompleted { state } => {
                current = *state;
                for line in build_text_summary(&current).lines {
                    let _ = out_tx.send(OutputLine::Stdout(line));
                }
            }
            RunEvent::Cleared => {
                current.clear();
                let _ = out_tx.send(OutputLine::Stderr("Cleared".into()));
            }
            other => {
                if let Some(msg) = other.to_message() {
                    let _ = out_tx.send(OutputLine::Stderr(msg));
                }
            }
        }
    }

    reader.abort();
    controller.await.context("controller task failed")??;
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
