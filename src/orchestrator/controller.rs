//! Interactive run controller.
//!
//! Owns submit/clear/quit orchestration and emits events for presentation layers.

use super::post_process::{process_run_completion, ProcessedRun};
use crate::model::{InstructionRequest, RunEvent, RunState};
use crate::session::Session;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinError, JoinHandle};

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Submit(InstructionRequest),
    Clear,
    Quit,
}

/// Internal handle for a running submission.
struct RunCtx {
    events: UnboundedReceiver<RunEvent>,
    handle: Option<JoinHandle<(RunState, ProcessedRun)>>,
}

enum RunProgress {
    Event(RunEvent),
    Finished(Result<(RunState, ProcessedRun), JoinError>),
}

impl RunCtx {
    /// Stop the run. Dropping its task kills live renderers and records the
    /// run as interrupted.
    fn abort(self) {
        if let Some(h) = self.handle {
            h.abort();
        }
    }

    /// Next event of the run, then its completion once the event stream closes.
    async fn next(&mut self) -> RunProgress {
        if let Some(ev) = self.events.recv().await {
            return RunProgress::Event(ev);
        }
        match self.handle.as_mut() {
            Some(h) => RunProgress::Finished(h.await),
            None => futures::future::pending().await,
        }
    }
}

/// Spawn a submission with its own event channel.
fn start_run(session: &Arc<Session>, request: InstructionRequest) -> RunCtx {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<RunEvent>();
    let session = Arc::clone(session);
    let handle = tokio::spawn(async move {
        let state = session.submit(&request, &tx).await;
        let processed = process_run_completion(session.config(), &state);
        (state, processed)
    });
    RunCtx {
        events: rx,
        handle: Some(handle),
    }
}

/// Orchestrate submissions based on UI commands and emit events back to
/// presentation layers.
///
/// Only the latest submission is reported. Submitting or clearing while a run
/// is in flight aborts that run; its events and result are dropped.
pub(crate) async fn run_controller(
    session: Arc<Session>,
    event_tx: UnboundedSender<RunEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut run_ctx: Option<RunCtx> = None;
    let mut quit_pending = false;

    let res = loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if !quit_pending => {
                match cmd {
                    Some(UiCommand::Submit(request)) => {
                        if let Some(ctx) = run_ctx.take() {
                            ctx.abort();
                            let _ = event_tx.send(RunEvent::Info("Previous run superseded".into()));
                        }
                        run_ctx = Some(start_run(&session, request));
                    }
                    Some(UiCommand::Clear) => {
                        if let Some(ctx) = run_ctx.take() {
                            ctx.abort();
                        }
                        let _ = event_tx.send(RunEvent::Cleared);
                    }
                    Some(UiCommand::Quit) | None => {
                        // Quit waits for the current run so its outcome is still reported.
                        if run_ctx.is_none() {
                            break Ok(());
                        }
                        quit_pending = true;
                        let _ = event_tx.send(RunEvent::Info(
                            "Waiting for the current run to finish…".into(),
                        ));
                    }
                }
            }
            // The JoinHandle stays in run_ctx until this branch wins, so losing the
            // race to a command never drops the completion.
            progress = async {
                match run_ctx.as_mut() {
                    Some(ctx) => ctx.next().await,
                    None => futures::future::pending().await,
                }
            } => {
                match progress {
                    RunProgress::Event(ev) => {
                        let _ = event_tx.send(ev);
                    }
                    RunProgress::Finished(join_res) => {
                        run_ctx = None;
                        match join_res {
                            Ok((state, processed)) => {
                                for msg in processed.messages {
                                    let _ = event_tx.send(RunEvent::Info(msg));
                                }
                                if let Some(p) = processed.manifest_path {
                                    let _ = event_tx.send(RunEvent::Info(format!("Saved: {}", p.display())));
                                }
                                let _ = event_tx.send(RunEvent::RunCompleted { state: Box::new(state) });
                            }
                            Err(e) => {
                                let _ = event_tx.send(RunEvent::Info(format!("Run join failed: {e}")));
                            }
                        }
                        if quit_pending {
                            break Ok(());
                        }
                    }
                }
            }
        }
    };

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{build_config, Cli};
    use crate::generation::{GenerationRequest, GenerationService};
    use crate::model::{GenerationResult, RunStatus, TaskCategory};
    use async_trait::async_trait;
    use clap::Parser;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Answers with the instruction as the code; "slow" instructions stall.
    struct Echo;

    #[async_trait]
    impl GenerationService for Echo {
        async fn generate(&self, req: &GenerationRequest) -> anyhow::Result<serde_json::Value> {
            if req.instruction.starts_with("slow") {
                tokio::time::sleep(Duration::from_millis(400)).await;
            }
            Ok(serde_json::json!({"explanation": "echo", "code": req.instruction}))
        }
    }

    fn session(root: &std::path::Path) -> Arc<Session> {
        let cfg = build_config(&Cli::parse_from([
            "jarvis",
            "--work-dir",
            root.to_str().unwrap(),
        ]));
        Arc::new(Session::new(cfg, Arc::new(Echo)))
    }

    fn submit(text: &str) -> UiCommand {
        UiCommand::Submit(InstructionRequest::new(text, TaskCategory::Python))
    }

    async fn completed_states(
        cmds: Vec<UiCommand>,
        root: &std::path::Path,
    ) -> (Vec<RunState>, usize) {
        let (evt_tx, mut evt_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        for c in cmds {
            cmd_tx.send(c).unwrap();
        }
        cmd_tx.send(UiCommand::Quit).unwrap();

        tokio::time::timeout(
            Duration::from_secs(10),
            run_controller(session(root), evt_tx, cmd_rx),
        )
        .await
        .expect("controller did not stop")
        .unwrap();

        let mut states = Vec::new();
        let mut cleared = 0;
        while let Ok(ev) = evt_rx.try_recv() {
            match ev {
                RunEvent::RunCompleted { state } => states.push(*state),
                RunEvent::Cleared => cleared += 1,
                _ => {}
            }
        }
        (states, cleared)
    }

    fn run_dirs(root: &std::path::Path) -> usize {
        std::fs::read_dir(root.join(crate::workspace::RUNS_DIR))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    fn code_of(state: &RunState) -> &str {
        match state.result.as_ref() {
            Some(GenerationResult::Code(c)) => &c.code,
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn quit_waits_for_the_active_run() {
        let root = tempfile::tempdir().unwrap();
        let (states, _) = completed_states(vec![submit("slow one")], root.path()).await;
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].status, RunStatus::Completed);
        assert_eq!(code_of(&states[0]), "slow one");
    }

    #[tokio::test]
    async fn a_new_submission_supersedes_the_previous_one() {
        let root = tempfile::tempdir().unwrap();
        let (states, _) =
            completed_states(vec![submit("slow first"), submit("second")], root.path()).await;
        assert_eq!(states.len(), 1);
        assert_eq!(code_of(&states[0]), "second");

        // The superseded run was aborted, so it never reaches its run directory.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(run_dirs(root.path()), 1);
    }

    #[tokio::test]
    async fn clear_drops_the_in_flight_run() {
        let root = tempfile::tempdir().unwrap();
        let (states, cleared) =
            completed_states(vec![submit("slow first"), UiCommand::Clear], root.path()).await;
        assert!(states.is_empty());
        assert_eq!(cleared, 1);

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(run_dirs(root.path()), 0);
    }
}
