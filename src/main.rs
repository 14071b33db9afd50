use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{
        self, DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture,
        Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent,
        MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{backend::CrosstermBackend, prelude::*};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod db;
mod grid;
mod model;
mod selection;
mod ui;

use app::{App, Focus, PromptKind};
use config::Settings;
use db::{DBRequest, DBResponse, Identity, start_db_worker};
use grid::Direction;
use model::CellAddress;
use ui::Hit;

#[derive(Parser, Debug)]
#[command(author, version, about = "Terminal spreadsheet grid backed by SQLite")]
struct Args {
    /// Path to SQLite database file (defaults to the platform data dir)
    #[arg(value_name = "DB_PATH")]
    db_path: Option<PathBuf>,

    /// Organization the sheets belong to
    #[arg(long)]
    org: Option<String>,

    /// User the sheets belong to
    #[arg(long)]
    user: Option<String>,

    /// Rows shown for a fresh sheet
    #[arg(short = 'n', long)]
    rows: Option<usize>,

    /// Config file (defaults to ~/.config/sheetgrid/config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Where to write the log
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

impl Args {
    fn apply(self, settings: &mut Settings) {
        if let Some(path) = self.db_path {
            settings.database = Some(path);
        }
        if let Some(org) = self.org {
            settings.organization_id = org;
        }
        if let Some(user) = self.user {
            settings.user_id = user;
        }
        if let Some(rows) = self.rows.filter(|&r| r > 0) {
            settings.initial_rows = rows;
        }
        if let Some(path) = self.log_file {
            settings.log_file = Some(path);
        }
    }
}

/// The terminal belongs to the UI, so logs go to a file.
fn init_logging(path: &Path, default_filter: &str) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening log file {}", path.display()))?;
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(
        stdout,
        EnterAlternateScreen,
        EnableMouseCapture,
        EnableFocusChange
    )?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture,
        DisableFocusChange
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    args.apply(&mut settings);

    let log_path = settings.log_path();
    if let Err(e) = init_logging(&log_path, &settings.log_filter) {
        eprintln!("Logging disabled: {e:#}");
    }

    let db_path = settings.database_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    info!(
        db = %db_path.display(),
        org = %settings.organization_id,
        user = %settings.user_id,
        "starting"
    );

    let mut terminal = setup_terminal()?;

    // DB worker channels
    let (req_tx, req_rx) = crossbeam_channel::unbounded::<DBRequest>();
    let (resp_tx, resp_rx) = crossbeam_channel::unbounded::<DBResponse>();

    let identity = Identity {
        organization_id: settings.organization_id.clone(),
        user_id: settings.user_id.clone(),
    };
    let worker_path = db_path.to_string_lossy().into_owned();
    let worker =
        std::thread::spawn(move || start_db_worker(worker_path, identity, req_rx, resp_tx));

    let mut app = App::new(
        settings.initial_rows,
        settings.column_width,
        req_tx,
        resp_rx,
    );
    app.request_sheet_list();

    let mut last_tick = Instant::now();
    let tick_rate = Duration::from_millis(100);

    let res = run_app(&mut terminal, &mut app, tick_rate, &mut last_tick);

    // Don't lose an edit in progress on quit
    app.blur_grid();

    restore_terminal(terminal)?;

    // Closing the request channel lets the worker finish queued writes
    drop(app);
    let _ = worker.join();

    if let Err(e) = res {
        warn!(error = %e, "event loop failed");
        eprintln!("Error: {e:?}");
    }
    info!("exiting");
    Ok(())
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    tick_rate: Duration,
    last_tick: &mut Instant,
) -> Result<()> {
    // Redraw only when state changes or on tick
    let mut dirty = true;
    loop {
        // Process any DB responses without blocking
        while let Ok(msg) = app.resp_rx.try_recv() {
            app.handle_db_response(msg);
            dirty = true;
        }

        let tick_due = last_tick.elapsed() >= tick_rate;
        if dirty || tick_due {
            terminal.draw(|f| ui::draw(f, app))?;
            dirty = false;
            if tick_due {
                *last_tick = Instant::now();
            }
        }

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::from_secs(0));

        if crossterm::event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(app, key),
                Event::Mouse(mouse) => handle_mouse(app, mouse),
                Event::FocusLost => app.blur_grid(),
                _ => {}
            }
            dirty = true;
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    if app.prompt.is_some() {
        match key.code {
            KeyCode::Enter => app.submit_prompt(),
            KeyCode::Esc => app.cancel_prompt(),
            KeyCode::Backspace => app.prompt_backspace(),
            KeyCode::Char(c) => app.prompt_insert(c),
            _ => {}
        }
        return;
    }

    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);
    let shift = key.modifiers.contains(KeyModifiers::SHIFT);

    match app.focus {
        Focus::Sheets => match key.code {
            KeyCode::Char('q') => app.should_quit = true,
            KeyCode::Char('c') if ctrl => app.should_quit = true,
            KeyCode::Up | KeyCode::Char('k') => app.move_sheet_selection_up(),
            KeyCode::Down | KeyCode::Char('j') => app.move_sheet_selection_down(),
            KeyCode::Enter => {
                app.open_selected_sheet();
                app.focus_grid();
            }
            KeyCode::Char('n') => app.begin_prompt(PromptKind::NewSheet),
            KeyCode::Char('R') => app.request_sheet_list(),
            KeyCode::Tab => app.toggle_focus(),
            _ => {}
        },
        Focus::Grid => {
            // Bindings that work in every grid mode
            match key.code {
                KeyCode::Tab | KeyCode::BackTab => return app.toggle_focus(),
                KeyCode::Char('q') | KeyCode::Char('c') if ctrl => {
                    app.should_quit = true;
                    return;
                }
                KeyCode::Char('n') if ctrl => return app.begin_prompt(PromptKind::NewColumn),
                KeyCode::Char('r') if ctrl => return app.begin_rename_focused_column(),
                KeyCode::F(2) => return app.begin_prompt(PromptKind::RenameSheet),
                KeyCode::Left if alt => return app.move_focused_column(-1),
                KeyCode::Right if alt => return app.move_focused_column(1),
                _ => {}
            }

            if app.grid.is_editing() {
                match key.code {
                    KeyCode::Enter => app.key_enter(),
                    KeyCode::Esc => app.key_escape(),
                    KeyCode::Backspace => app.grid.backspace(),
                    KeyCode::Delete => app.grid.delete(),
                    KeyCode::Left => app.grid.cursor_left(),
                    KeyCode::Right => app.grid.cursor_right(),
                    KeyCode::Home => app.grid.cursor_home(),
                    KeyCode::End => app.grid.cursor_end(),
                    KeyCode::Char(c) if !ctrl && !alt => app.key_char(c),
                    _ => {}
                }
                return;
            }

            match key.code {
                KeyCode::Enter => app.key_enter(),
                KeyCode::Esc => app.key_escape(),
                KeyCode::Up => app.key_arrow(Direction::Up, shift),
                KeyCode::Down => app.key_arrow(Direction::Down, shift),
                KeyCode::Left => app.key_arrow(Direction::Left, shift),
                KeyCode::Right => app.key_arrow(Direction::Right, shift),
                KeyCode::Char(c) if !ctrl && !alt => app.key_char(c),
                _ => {}
            }
        }
    }
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let (x, y) = (mouse.column, mouse.row);
    let hit = app.layout.and_then(|l| l.hit(x, y));
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => {
            let offset = app.sheet_list.offset();
            if let Some(index) = ui::sheet_at(app.sheets_area, offset, x, y) {
                app.blur_grid();
                app.pick_sheet(index);
                return;
            }
            match hit {
                Some(Hit::Cell { col, row, handle }) => {
                    let Some(column) = app.sheet.as_ref().and_then(|s| s.column_at(col)) else {
                        return;
                    };
                    let addr = CellAddress::new(column.id.clone(), row);
                    let shift = mouse.modifiers.contains(KeyModifiers::SHIFT);
                    app.pointer_down(addr, handle, shift);
                }
                Some(Hit::Header(index)) => app.begin_header_drag(index),
                None => {}
            }
        }
        MouseEventKind::Drag(MouseButton::Left) => {
            if app.grid.drag().is_none() {
                return;
            }
            if let Some(Hit::Cell { col, row, .. }) = hit
                && let Some(column) = app.sheet.as_ref().and_then(|s| s.column_at(col))
            {
                let addr = CellAddress::new(column.id.clone(), row);
                app.pointer_drag(addr);
            }
        }
        MouseEventKind::Up(MouseButton::Left) => {
            app.pointer_up();
            let over = match hit {
                Some(Hit::Header(index)) => Some(index),
                _ => None,
            };
            app.end_header_drag(over);
        }
        MouseEventKind::ScrollDown if app.focus == Focus::Sheets => {
            app.move_sheet_selection_down()
        }
        MouseEventKind::ScrollUp if app.focus == Focus::Sheets => app.move_sheet_selection_up(),
        _ => {}
    }
}
