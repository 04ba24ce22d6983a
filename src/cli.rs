use crate::loader::EngineLoader;
use crate::model::{IsolationMode, RunConfig};
use crate::store::CodeStore;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
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
    name = "wasmpad",
    version,
    about = "Terminal code pad backed by an isolated wasm execution engine"
)]
pub struct Cli {
    /// Path to the execution engine module (.wasm)
    #[arg(long)]
    pub engine: std::path::PathBuf,

    /// Program file to open in the editor or run headless; stdin when
    /// omitted in headless modes
    pub program: Option<std::path::PathBuf>,

    /// Print the run outcome as JSON and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print a text summary and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Where submitted code runs
    #[arg(long, value_enum, default_value = "in-process")]
    pub isolation: IsolationMode,

    /// Hard wall-clock limit for one run
    #[arg(long, default_value = "5s")]
    pub exec_timeout: humantime::Duration,

    /// How long to wait for a worker to become ready
    #[arg(long, default_value = "10s")]
    pub spawn_timeout: humantime::Duration,

    /// Cap on captured engine output, in bytes
    #[arg(long, default_value_t = 262_144)]
    pub max_output_bytes: usize,

    /// Export the run outcome as JSON
    #[arg(long)]
    pub export_json: Option<std::path::PathBuf>,
}

pub async fn run(args: Cli) -> Result<()> {
    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_headless(args, false).await;
        }
    }

    let json = args.json;
    run_headless(args, json).await
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        engine_path: args.engine.clone(),
        isolation: args.isolation,
        exec_timeout: Duration::from(args.exec_timeout),
        spawn_timeout: Duration::from(args.spawn_timeout),
        max_output_bytes: args.max_output_bytes,
    }
}

/// Read the program text for headless modes: the file argument, or stdin.
fn read_program(args: &Cli) -> Result<String> {
    match args.program.as_deref() {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read program {}", path.display())),
        None => {
            let mut code = String::new();
            std::io::stdin()
                .read_to_string(&mut code)
                .context("failed to read program from stdin")?;
            Ok(code)
        }
    }
}

/// Run one program through the bridge and print the outcome.
/// `json` selects JSON output over the text summary.
async fn run_headless(args: Cli, json: bool) -> Result<()> {
    let cfg = build_config(&args);
    let code = read_program(&args)?;

    let loader = Arc::new(EngineLoader::new(cfg));
    let store = CodeStore::new(loader);
    store.set_code(code);

    let (out_tx, out_handle) = spawn_output_writer();

    let outcome = store.run_current_code().await.context("run failed")?;

    handle_exports(&args, &outcome)?;

    if json {
        let out = serde_json::to_string_pretty(&outcome)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    } else {
        let summary = crate::text_summary::build_text_summary(&outcome);
        for line in summary.lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    if !outcome.succeeded() {
        let _ = out_tx.send(OutputLine::Stderr(format!(
            "engine reported status {}",
            outcome.status
        )));
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

/// Handle export operations for headless modes.
fn handle_exports(args: &Cli, outcome: &crate::model::RunOutcome) -> Result<()> {
    if let Some(p) = args.export_json.as_deref() {
        let body = serde_json::to_string_pretty(outcome)?;
        std::fs::write(p, body)
            .with_context(|| format!("failed to export JSON to {}", p.display()))?;
    }
    Ok(())
}
