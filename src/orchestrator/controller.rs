//! Run lifecycle controller.
//!
//! Owns run orchestration for interactive sessions and emits events for
//! presentation layers.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::loader::RunError;
use crate::model::{ExecutionRequest, InfoEvent, RunEvent, RunOutcome};
use crate::store::CodeStore;

/// Commands emitted by UI layers to control execution.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Run,
    Quit,
}

type RunTask = JoinHandle<(String, Result<RunOutcome, RunError>)>;

/// Snapshot the buffer, announce the run, and dispatch it off-thread.
fn start_run(store: &Arc<CodeStore>, event_tx: &UnboundedSender<RunEvent>) -> RunTask {
    // Snapshot before anything can suspend; the run executes the buffer as
    // it was at trigger time.
    let request = ExecutionRequest::new(store.code());
    let request_id = request.id.clone();
    let _ = event_tx.send(RunEvent::RunStarted {
        request_id: request_id.clone(),
    });

    let loader = store.loader().clone();
    let was_loaded = loader.is_loaded();
    if !was_loaded {
        let _ = event_tx.send(RunEvent::Info(InfoEvent::LoadingEngine {
            path: loader.config().engine_path.clone(),
        }));
    }

    let event_tx = event_tx.clone();
    tokio::spawn(async move {
        let result = loader.dispatch(request).await;
        if !was_loaded && result.is_ok() {
            let _ = event_tx.send(RunEvent::EngineReady);
        }
        (request_id, result)
    })
}

/// Orchestrate runs based on UI commands and emit events back to
/// presentation layers. Keeps at most one run in flight; extra triggers are
/// reported, not queued.
pub(crate) async fn run_controller(
    store: Arc<CodeStore>,
    event_tx: UnboundedSender<RunEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut run_task: Option<RunTask> = None;
    let mut quit_pending = false;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Run) => {
                        if run_task.is_some() {
                            let _ = event_tx.send(RunEvent::Info(InfoEvent::RunInFlight));
                        } else {
                            run_task = Some(start_run(&store, &event_tx));
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        // Quit waits for the current run so its outcome is
                        // still delivered.
                        if run_task.is_none() {
                            break;
                        }
                        quit_pending = true;
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it
            // can be dropped if another select branch is chosen, and we'll
            // never observe completion.
            join_res = async {
                match run_task.as_mut() {
                    Some(task) => task.await,
                    None => futures::future::pending().await,
                }
            } => {
                run_task = None;
                match join_res {
                    Ok((_, Ok(outcome))) => {
                        let _ = event_tx.send(RunEvent::RunCompleted {
                            outcome: Box::new(outcome),
                        });
                    }
                    Ok((request_id, Err(e))) => {
                        let _ = event_tx.send(RunEvent::RunFailed {
                            request_id,
                            error: format!("{e:#}"),
                        });
                    }
                    Err(e) => {
                        let _ = event_tx.send(RunEvent::Info(InfoEvent::Message(format!(
                            "Run join failed: {e}"
                        ))));
                    }
                }
                if quit_pending {
                    break;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::test_support::{test_config, StubResolver};
    use crate::loader::EngineLoader;
    use crate::model::IsolationMode;
    use tokio::sync::mpsc;

    fn store_with(resolver: Arc<StubResolver>) -> Arc<CodeStore> {
        let loader = Arc::new(EngineLoader::with_resolver(
            test_config(IsolationMode::InProcess),
            resolver,
        ));
        Arc::new(CodeStore::new(loader))
    }

    #[tokio::test]
    async fn run_then_quit_delivers_the_outcome() {
        let resolver = StubResolver::new();
        let store = store_with(resolver.clone());
        store.set_code("print(1)");

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        cmd_tx.send(UiCommand::Run).unwrap();
        cmd_tx.send(UiCommand::Quit).unwrap();
        run_controller(store, event_tx, cmd_rx).await.unwrap();

        let mut completed = false;
        while let Ok(ev) = event_rx.try_recv() {
            if let RunEvent::RunCompleted { outcome } = ev {
                completed = true;
                assert_eq!(outcome.output, vec!["print(1)".to_string()]);
            }
        }
        assert!(completed);
        assert_eq!(
            resolver.engine.executed.lock().unwrap().as_slice(),
            ["print(1)".to_string()]
        );
    }

    #[tokio::test]
    async fn load_failure_becomes_a_run_failed_event() {
        let resolver = StubResolver::failing(1);
        let store = store_with(resolver);
        store.set_code("print(1)");

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        cmd_tx.send(UiCommand::Run).unwrap();
        cmd_tx.send(UiCommand::Quit).unwrap();
        run_controller(store.clone(), event_tx, cmd_rx).await.unwrap();

        let mut failed = false;
        while let Ok(ev) = event_rx.try_recv() {
            if let RunEvent::RunFailed { error, .. } = ev {
                failed = true;
                assert!(error.contains("load failed"));
            }
        }
        assert!(failed);
        // The buffer survives a failed run untouched.
        assert_eq!(store.code(), "print(1)");
    }
}
