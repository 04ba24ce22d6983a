mod help;

use crate::cli::Cli;
use crate::loader::EngineLoader;
use crate::model::{RunEvent, RunOutcome};
use crate::orchestrator::{self, UiCommand};
use crate::store::CodeStore;
use crate::util::fill_range;
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

struct UiState {
    // Editor contents mirrored from the store; the editor is the only writer.
    lines: Vec<String>,
    cursor_row: usize,
    cursor_col: usize,
    editor_scroll: usize,

    running: bool,
    engine_loaded: bool,
    output: Vec<String>,
    last_outcome: Option<RunOutcome>,
    info: String,
    show_help: bool,
}

impl UiState {
    fn from_buffer(buffer: &str) -> Self {
        Self {
            lines: buffer.split('\n').map(str::to_string).collect(),
            cursor_row: 0,
            cursor_col: 0,
            editor_scroll: 0,
            running: false,
            engine_loaded: false,
            output: Vec::new(),
            last_outcome: None,
            info: String::new(),
            show_help: false,
        }
    }

    fn buffer(&self) -> String {
        self.lines.join("\n")
    }

    fn clamp_cursor(&mut self) {
        if self.lines.is_empty() {
            self.lines.push(String::new());
        }
        self.cursor_row = self.cursor_row.min(self.lines.len() - 1);
        self.cursor_col = self.cursor_col.min(self.lines[self.cursor_row].chars().count());
    }
}

/// Byte offset of the `col`-th character in `line`.
fn byte_col(line: &str, col: usize) -> usize {
    line.char_indices()
        .nth(col)
        .map(|(i, _)| i)
        .unwrap_or(line.len())
}

fn apply_event(state: &mut UiState, ev: RunEvent) {
    match ev {
        RunEvent::RunStarted { .. } => {
            state.running = true;
            state.output.clear();
            state.info = "Running…".into();
        }
        RunEvent::EngineReady => {
            state.engine_loaded = true;
        }
        RunEvent::RunCompleted { outcome } => {
            state.running = false;
            state.output = outcome.output.clone();
            if outcome.truncated {
                state.output.push("… output truncated".into());
            }
            state.info = if outcome.succeeded() {
                format!("Run ok in {} ms", outcome.wall_time_ms)
            } else {
                format!(
                    "Run failed (status {}) in {} ms",
                    outcome.status, outcome.wall_time_ms
                )
            };
            state.last_outcome = Some(*outcome);
        }
        RunEvent::RunFailed { error, .. } => {
            state.running = false;
            state.info = format!("Run failed: {error}");
        }
        RunEvent::Info(info) => {
            state.info = info.to_message();
        }
    }
}

pub async fn run(args: Cli) -> Result<()> {
    // Unbounded channels avoid backpressure and task switching in the hot path.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let loader = Arc::new(EngineLoader::new(crate::cli::build_config(&args)));
    let store = Arc::new(CodeStore::new(loader));
    if let Some(path) = args.program.as_deref() {
        let code = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read program {}", path.display()))?;
        store.set_code(code);
    }

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let ui_store = store.clone();
    let ui_handle =
        std::thread::spawn(move || run_threaded(ui_args, ui_store, event_rx, cmd_tx));

    let res = orchestrator::run_controller(store, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    args: Cli,
    store: Arc<CodeStore>,
    mut event_rx: UnboundedReceiver<RunEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; edits flow back through the store.
    let mut state = UiState::from_buffer(&store.code());
    state.info = format!("Engine: {}", args.engine.display());

    let tick_rate = Duration::from_millis(50);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep the editor responsive.
        while let Ok(ev) = event_rx.try_recv() {
            apply_event(&mut state, ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &mut state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if state.show_help && k.code != KeyCode::F(1) {
                    state.show_help = false;
                    continue;
                }
                match (k.modifiers, k.code) {
                    (KeyModifiers::CONTROL, KeyCode::Char('q'))
                    | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    (KeyModifiers::CONTROL, KeyCode::Char('r')) | (_, KeyCode::F(5)) => {
                        let _ = cmd_tx.send(UiCommand::Run);
                    }
                    (KeyModifiers::CONTROL, KeyCode::Char('s')) => {
                        state.info = save_last_outcome(&args, &state);
                    }
                    (_, KeyCode::F(1)) => {
                        state.show_help = !state.show_help;
                    }
                    (_, key) => {
                        if edit(&mut state, k.modifiers, key) {
                            // Every keystroke writes straight back to the store.
                            store.set_code(state.buffer());
                        }
                    }
                }
            }
        }
    };

    disable_raw_mode().ok();
    execute!(io::stdout(), LeaveAlternateScreen).ok();
    res
}

/// Export the last completed outcome as JSON; returns the status message.
fn save_last_outcome(args: &Cli, state: &UiState) -> String {
    let Some(outcome) = state.last_outcome.as_ref() else {
        return "No completed run to save yet.".into();
    };
    let path = args
        .export_json
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from("wasmpad-run.json"));
    match serde_json::to_string_pretty(outcome)
        .map_err(anyhow::Error::from)
        .and_then(|body| std::fs::write(&path, body).map_err(anyhow::Error::from))
    {
        Ok(()) => format!("Saved: {}", path.display()),
        Err(e) => format!("Save failed: {e:#}"),
    }
}

/// Apply one editing key; returns whether the buffer changed.
fn edit(state: &mut UiState, modifiers: KeyModifiers, key: KeyCode) -> bool {
    state.clamp_cursor();
    let row = state.cursor_row;
    match key {
        KeyCode::Char(c) if !modifiers.contains(KeyModifiers::CONTROL) => {
            let at = byte_col(&state.lines[row], state.cursor_col);
            state.lines[row].insert(at, c);
            state.cursor_col += 1;
            true
        }
        KeyCode::Tab => {
            let at = byte_col(&state.lines[row], state.cursor_col);
            state.lines[row].insert_str(at, "    ");
            state.cursor_col += 4;
            true
        }
        KeyCode::Enter => {
            let at = byte_col(&state.lines[row], state.cursor_col);
            let rest = state.lines[row].split_off(at);
            state.lines.insert(row + 1, rest);
            state.cursor_row += 1;
            state.cursor_col = 0;
            true
        }
        KeyCode::Backspace => {
            if state.cursor_col > 0 {
                let at = byte_col(&state.lines[row], state.cursor_col - 1);
                state.lines[row].remove(at);
                state.cursor_col -= 1;
                true
            } else if row > 0 {
                let removed = state.lines.remove(row);
                state.cursor_row -= 1;
                state.cursor_col = state.lines[row - 1].chars().count();
                state.lines[row - 1].push_str(&removed);
                true
            } else {
                false
            }
        }
        KeyCode::Delete => {
            let col_chars = state.lines[row].chars().count();
            if state.cursor_col < col_chars {
                let at = byte_col(&state.lines[row], state.cursor_col);
                state.lines[row].remove(at);
                true
            } else if row + 1 < state.lines.len() {
                let next = state.lines.remove(row + 1);
                state.lines[row].push_str(&next);
                true
            } else {
                false
            }
        }
        KeyCode::Up => {
            state.cursor_row = state.cursor_row.saturating_sub(1);
            state.clamp_cursor();
            false
        }
        KeyCode::Down => {
            if state.cursor_row + 1 < state.lines.len() {
                state.cursor_row += 1;
            }
            state.clamp_cursor();
            false
        }
        KeyCode::Left => {
            if state.cursor_col > 0 {
                state.cursor_col -= 1;
            } else if state.cursor_row > 0 {
                state.cursor_row -= 1;
                state.cursor_col = state.lines[state.cursor_row].chars().count();
            }
            false
        }
        KeyCode::Right => {
            if state.cursor_col < state.lines[row].chars().count() {
                state.cursor_col += 1;
            } else if row + 1 < state.lines.len() {
                state.cursor_row += 1;
                state.cursor_col = 0;
            }
            false
        }
        KeyCode::Home => {
            state.cursor_col = 0;
            false
        }
        KeyCode::End => {
            state.cursor_col = state.lines[row].chars().count();
            false
        }
        _ => false,
    }
}

fn draw(area: Rect, f: &mut Frame, state: &mut UiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(5),
            Constraint::Percentage(30),
            Constraint::Length(1),
        ])
        .split(area);

    draw_editor(rows[0], f, state);
    draw_output(rows[1], f, state);
    draw_status(rows[2], f, state);

    if state.show_help {
        help::draw_help(centered(area, 50, 14), f);
    }
}

fn draw_editor(area: Rect, f: &mut Frame, state: &mut UiState) {
    let inner_height = area.height.saturating_sub(2) as usize;

    // Keep the cursor inside the viewport.
    if state.cursor_row < state.editor_scroll {
        state.editor_scroll = state.cursor_row;
    } else if inner_height > 0 && state.cursor_row >= state.editor_scroll + inner_height {
        state.editor_scroll = state.cursor_row + 1 - inner_height;
    }

    let text: Vec<Line> = state
        .lines
        .iter()
        .skip(state.editor_scroll)
        .take(inner_height.max(1))
        .map(|l| Line::raw(l.clone()))
        .collect();

    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled("Code", Style::default().add_modifier(Modifier::BOLD)));
    f.render_widget(Paragraph::new(text).block(block), area);

    let col = state.cursor_col.min(u16::MAX as usize) as u16;
    let row = (state.cursor_row - state.editor_scroll).min(u16::MAX as usize) as u16;
    f.set_cursor_position((
        area.x + 1 + col.min(area.width.saturating_sub(2)),
        area.y + 1 + row.min(area.height.saturating_sub(2)),
    ));
}

fn draw_output(area: Rect, f: &mut Frame, state: &UiState) {
    let inner_height = area.height.saturating_sub(2) as usize;

    // Tail the output, padding short output with blank lines so the pane
    // keeps a stable shape.
    let tail_start = state.output.len().saturating_sub(inner_height);
    let mut text: Vec<Line> = state.output[tail_start..]
        .iter()
        .map(|l| Line::raw(l.clone()))
        .collect();
    if text.len() < inner_height && inner_height > 0 {
        let missing = inner_height - text.len();
        text.extend(fill_range(1, missing as i64, Line::raw("")));
    }

    let title = if state.running { "Output (running…)" } else { "Output" };
    let block = Block::default().borders(Borders::ALL).title(title);
    f.render_widget(Paragraph::new(text).block(block), area);
}

fn draw_status(area: Rect, f: &mut Frame, state: &UiState) {
    let engine = if state.engine_loaded {
        Span::styled("engine ready", Style::default().fg(Color::Green))
    } else {
        Span::styled("engine not loaded", Style::default().fg(Color::DarkGray))
    };
    let line = Line::from(vec![
        Span::styled(" Ctrl-R", Style::default().fg(Color::Magenta)),
        Span::raw(" run  "),
        Span::styled("F1", Style::default().fg(Color::Magenta)),
        Span::raw(" help  "),
        Span::styled("Ctrl-Q", Style::default().fg(Color::Magenta)),
        Span::raw(" quit  | "),
        engine,
        Span::raw("  "),
        Span::raw(state.info.clone()),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

/// A centered rect of at most `width` x `height` inside `area`.
fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    Rect {
        x: area.x + (area.width - w) / 2,
        y: area.y + (area.height - h) / 2,
        width: w,
        height: h,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_round_trips_through_the_editor() {
        let state = UiState::from_buffer("a\nb\nc");
        assert_eq!(state.lines, vec!["a", "b", "c"]);
        assert_eq!(state.buffer(), "a\nb\nc");
    }

    #[test]
    fn placeholder_splits_into_blank_lines() {
        let state = UiState::from_buffer(&crate::util::placeholder_buffer());
        assert_eq!(state.lines.len(), 11);
        assert!(state.lines.iter().all(String::is_empty));
    }

    #[test]
    fn typing_and_newline_edit_the_buffer() {
        let mut state = UiState::from_buffer("");
        for c in "hi".chars() {
            edit(&mut state, KeyModifiers::NONE, KeyCode::Char(c));
        }
        edit(&mut state, KeyModifiers::NONE, KeyCode::Enter);
        edit(&mut state, KeyModifiers::NONE, KeyCode::Char('x'));
        assert_eq!(state.buffer(), "hi\nx");
        assert_eq!((state.cursor_row, state.cursor_col), (1, 1));
    }

    #[test]
    fn backspace_joins_lines() {
        let mut state = UiState::from_buffer("ab\ncd");
        state.cursor_row = 1;
        state.cursor_col = 0;
        assert!(edit(&mut state, KeyModifiers::NONE, KeyCode::Backspace));
        assert_eq!(state.buffer(), "abcd");
        assert_eq!((state.cursor_row, state.cursor_col), (0, 2));
    }

    #[test]
    fn completed_run_fills_the_output_pane() {
        let mut state = UiState::from_buffer("");
        apply_event(
            &mut state,
            RunEvent::RunStarted {
                request_id: "1".into(),
            },
        );
        assert!(state.running);
        apply_event(
            &mut state,
            RunEvent::RunCompleted {
                outcome: Box::new(RunOutcome {
                    request_id: "1".into(),
                    timestamp_utc: String::new(),
                    status: 0,
                    output: vec!["42".into()],
                    wall_time_ms: 7,
                    truncated: false,
                }),
            },
        );
        assert!(!state.running);
        assert_eq!(state.output, vec!["42".to_string()]);
        assert!(state.info.contains("Run ok"));
    }
}
