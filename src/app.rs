use std::collections::HashMap;

use crossbeam_channel::{Receiver, Sender};
use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tracing::{debug, warn};

use crate::db::{DBRequest, DBResponse, normalize_sheet_name};
use crate::grid::{CellWrite, Direction, GridState};
use crate::model::{CellAddress, CellMap, ColumnId, Sheet, SheetSummary};
use crate::ui::GridLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Sheets,
    Grid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKind {
    NewSheet,
    RenameSheet,
    NewColumn,
    RenameColumn(ColumnId),
}

impl PromptKind {
    pub fn label(&self) -> &'static str {
        match self {
            PromptKind::NewSheet => "New sheet",
            PromptKind::RenameSheet => "Rename sheet",
            PromptKind::NewColumn => "New column",
            PromptKind::RenameColumn(_) => "Rename column",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Prompt {
    pub kind: PromptKind,
    pub input: String,
}

/// Hands out per-cell sequence numbers and remembers the newest one issued,
/// so a reply for an older write is recognised as superseded.
#[derive(Debug, Default)]
pub struct WriteLedger {
    next_seq: u64,
    latest: HashMap<(String, CellAddress), u64>,
}

impl WriteLedger {
    pub fn issue(&mut self, sheet_id: &str, address: &CellAddress) -> u64 {
        self.next_seq += 1;
        self.latest
            .insert((sheet_id.to_string(), address.clone()), self.next_seq);
        self.next_seq
    }

    pub fn is_latest(&self, sheet_id: &str, address: &CellAddress, seq: u64) -> bool {
        self.latest
            .get(&(sheet_id.to_string(), address.clone()))
            .is_some_and(|&s| s == seq)
    }

    /// Forget a write once its newest version is acknowledged.
    pub fn settle(&mut self, sheet_id: &str, address: &CellAddress, seq: u64) {
        if self.is_latest(sheet_id, address, seq) {
            self.latest.remove(&(sheet_id.to_string(), address.clone()));
        }
    }

    pub fn pending(&self) -> usize {
        self.latest.len()
    }

    /// Cells of `sheet_id` with a write still in flight.
    pub fn pending_in<'a>(&'a self, sheet_id: &'a str) -> impl Iterator<Item = &'a CellAddress> {
        self.latest
            .keys()
            .filter(move |key| key.0 == sheet_id)
            .map(|(_, address)| address)
    }
}

pub struct App {
    pub should_quit: bool,

    // UI state
    pub status: String,
    pub focus: Focus,
    pub prompt: Option<Prompt>,

    // Sheet list
    pub sheets: Vec<SheetSummary>,
    pub selected_sheet: usize,
    /// Render state of the sheet list; keeps its scroll offset between frames
    pub sheet_list: ListState,

    // Open sheet and its interaction state
    pub sheet: Option<Sheet>,
    pub grid: GridState,
    pub initial_rows: usize,
    /// Sheet id requested but not yet delivered
    pub loading: Option<String>,

    // Viewport
    pub column_width: u16,
    pub scroll_row: usize,
    pub scroll_col: usize,
    /// Layout of the last drawn grid, used for mouse hit-testing
    pub layout: Option<GridLayout>,
    pub sheets_area: Rect,
    /// Column whose header is being dragged
    pub header_drag: Option<ColumnId>,

    pub ledger: WriteLedger,

    // Channels
    pub req_tx: Sender<DBRequest>,
    pub resp_rx: Receiver<DBResponse>,
}

impl App {
    pub fn new(
        initial_rows: usize,
        column_width: u16,
        req_tx: Sender<DBRequest>,
        resp_rx: Receiver<DBResponse>,
    ) -> Self {
        Self {
            should_quit: false,
            status: "Enter to open a sheet, n for a new one, Tab to switch panes, Ctrl-q to quit"
                .into(),
            focus: Focus::Sheets,
            prompt: None,
            sheets: vec![],
            selected_sheet: 0,
            sheet_list: ListState::default(),
            sheet: None,
            grid: GridState::new(initial_rows),
            initial_rows,
            loading: None,
            column_width,
            scroll_row: 0,
            scroll_col: 0,
            layout: None,
            sheets_area: Rect::default(),
            header_drag: None,
            ledger: WriteLedger::default(),
            req_tx,
            resp_rx,
        }
    }

    fn send(&self, req: DBRequest) {
        debug!(request = req.kind(), "queueing store request");
        if self.req_tx.send(req).is_err() {
            warn!("store worker is gone");
        }
    }

    pub fn request_sheet_list(&mut self) {
        self.send(DBRequest::ListSheets);
        self.status = "Loading sheets...".into();
    }

    pub fn handle_db_response(&mut self, resp: DBResponse) {
        match resp {
            DBResponse::Sheets { sheets } => {
                self.sheets = sheets;
                if self.selected_sheet >= self.sheets.len() {
                    self.selected_sheet = 0;
                }
                self.status = format!("Loaded {} sheets", self.sheets.len());
            }
            DBResponse::SheetCreated { sheet } => {
                self.status = format!("Created {}", sheet.name);
                let id = sheet.id.clone();
                self.sheets.insert(0, sheet);
                self.selected_sheet = 0;
                self.open_sheet(id);
            }
            DBResponse::SheetLoaded { sheet } => {
                if self.loading.as_deref() != Some(sheet.id.as_str()) {
                    debug!(sheet = %sheet.id, "ignoring superseded sheet load");
                    return;
                }
                self.loading = None;
                self.grid = GridState::for_sheet(&sheet, self.initial_rows);
                self.scroll_row = 0;
                self.scroll_col = 0;
                self.header_drag = None;
                self.status = format!(
                    "Viewing {} ({} columns, {} cells)",
                    sheet.name,
                    sheet.columns.len(),
                    sheet.cells.len()
                );
                self.sheet = Some(sheet);
                if self.focus == Focus::Grid {
                    self.focus_grid();
                }
            }
            DBResponse::SheetRenamed { sheet_id, name } => {
                if let Some(sheet) = self.sheet.as_mut().filter(|s| s.id == sheet_id) {
                    sheet.name = name.clone();
                }
                if let Some(entry) = self.sheets.iter_mut().find(|s| s.id == sheet_id) {
                    entry.name = name.clone();
                }
                self.status = format!("Sheet renamed to {name}");
            }
            DBResponse::ColumnUpserted { sheet_id, column } => {
                let Some(sheet) = self.sheet.as_mut().filter(|s| s.id == sheet_id) else {
                    return;
                };
                let mut columns = sheet.columns.clone();
                match columns.iter_mut().find(|c| c.id == column.id) {
                    Some(existing) => *existing = column.clone(),
                    None => columns.push(column.clone()),
                }
                sheet.set_columns(columns);
                self.grid.sync_columns(sheet);
                self.status = format!("Column {} saved", column.name);
            }
            DBResponse::ColumnsMoved { sheet_id, columns } => {
                let Some(sheet) = self.sheet.as_mut().filter(|s| s.id == sheet_id) else {
                    return;
                };
                sheet.set_columns(columns);
                self.grid.sync_columns(sheet);
                self.status = "Column moved".into();
            }
            DBResponse::CellWritten {
                sheet_id,
                address,
                seq,
                cells,
            } => {
                if self.ledger.is_latest(&sheet_id, &address, seq) {
                    self.ledger.settle(&sheet_id, &address, seq);
                    debug!(cell = %address.legacy_key(), seq, "cell persisted");
                } else {
                    debug!(cell = %address.legacy_key(), seq, "superseded write acknowledged");
                }
                self.reconcile_cells(&sheet_id, cells);
            }
            DBResponse::WriteSkipped { address, seq, .. } => {
                debug!(cell = %address.legacy_key(), seq, "store skipped stale write");
            }
            DBResponse::Error {
                request,
                message,
                not_found,
            } => {
                warn!(request, error = %message, "store request failed");
                if request == "load-sheet" {
                    self.loading = None;
                }
                self.status = if not_found {
                    format!("Not found: {message}")
                } else {
                    format!("Error ({request}): {message}")
                };
            }
        }
    }

    /// Adopt the stored cell map for the open sheet. Cells with a write
    /// still in flight keep their local value.
    fn reconcile_cells(&mut self, sheet_id: &str, mut stored: CellMap) {
        let Some(sheet) = self.sheet.as_mut().filter(|s| s.id == sheet_id) else {
            return;
        };
        for address in self.ledger.pending_in(sheet_id) {
            stored.set(address, sheet.cells.get(address));
        }
        sheet.cells = stored;
    }

    pub fn current_sheet_summary(&self) -> Option<&SheetSummary> {
        self.sheets.get(self.selected_sheet)
    }

    // ===== sheet list =====

    pub fn move_sheet_selection_up(&mut self) {
        if self.sheets.is_empty() {
            return;
        }
        if self.selected_sheet == 0 {
            self.selected_sheet = self.sheets.len() - 1;
        } else {
            self.selected_sheet -= 1;
        }
    }

    pub fn move_sheet_selection_down(&mut self) {
        if self.sheets.is_empty() {
            return;
        }
        self.selected_sheet = (self.selected_sheet + 1) % self.sheets.len();
    }

    /// Mouse pick in the sheet list: select and open.
    pub fn pick_sheet(&mut self, index: usize) {
        if index < self.sheets.len() {
            self.focus = Focus::Sheets;
            self.selected_sheet = index;
            self.open_selected_sheet();
        }
    }

    pub fn open_selected_sheet(&mut self) {
        if let Some(id) = self.current_sheet_summary().map(|s| s.id.clone()) {
            self.open_sheet(id);
        }
    }

    fn open_sheet(&mut self, sheet_id: String) {
        self.blur_grid();
        self.loading = Some(sheet_id.clone());
        self.send(DBRequest::LoadSheet { sheet_id });
        self.status = "Loading sheet...".into();
    }

    pub fn toggle_focus(&mut self) {
        match self.focus {
            Focus::Sheets => self.focus_grid(),
            Focus::Grid => {
                self.blur_grid();
                self.focus = Focus::Sheets;
            }
        }
    }

    /// Move keyboard focus into the grid, landing on the top-left cell when
    /// nothing is focused yet.
    pub fn focus_grid(&mut self) {
        self.focus = Focus::Grid;
        if self.grid.focused_cell().is_some() {
            return;
        }
        let first = self
            .sheet
            .as_ref()
            .and_then(|s| s.column_at(0))
            .map(|c| CellAddress::new(c.id.clone(), 0));
        if let Some(addr) = first {
            self.click_cell(addr, false);
        }
    }

    // ===== grid events =====

    pub fn click_cell(&mut self, addr: CellAddress, shift: bool) {
        let Some(sheet) = self.sheet.as_mut() else {
            return;
        };
        self.focus = Focus::Grid;
        let writes = self.grid.click(sheet, addr, shift);
        self.persist(writes);
    }

    /// Pointer-down inside the grid. On the selection handle it starts a
    /// drag-select, anywhere else it is a click. The handle is not drawn on
    /// the cell being edited, so it does not start a drag there.
    pub fn pointer_down(&mut self, addr: CellAddress, on_handle: bool, shift: bool) {
        if on_handle && !shift && !self.grid.is_editing() && self.grid.begin_drag(&addr) {
            self.focus = Focus::Grid;
            return;
        }
        self.click_cell(addr, shift);
    }

    pub fn pointer_drag(&mut self, addr: CellAddress) {
        if let Some(sheet) = self.sheet.as_ref() {
            self.grid.drag_to(sheet, addr);
        }
    }

    pub fn pointer_up(&mut self) {
        self.grid.end_drag();
    }

    pub fn key_char(&mut self, ch: char) {
        self.grid.type_char(ch);
    }

    pub fn key_enter(&mut self) {
        let Some(sheet) = self.sheet.as_mut() else {
            return;
        };
        let writes = self.grid.enter(sheet);
        self.persist(writes);
    }

    pub fn key_escape(&mut self) {
        self.grid.escape();
    }

    pub fn key_arrow(&mut self, dir: Direction, shift: bool) {
        if let Some(sheet) = self.sheet.as_ref() {
            self.grid.arrow(sheet, dir, shift);
        }
    }

    /// Keyboard focus left the grid: commit any edit in progress.
    pub fn blur_grid(&mut self) {
        let Some(sheet) = self.sheet.as_mut() else {
            return;
        };
        let writes = self.grid.blur(sheet);
        self.persist(writes);
    }

    /// Send committed edits to the store. Local state already reflects them;
    /// a failed write is reported but not rolled back.
    fn persist(&mut self, writes: Vec<CellWrite>) {
        let Some(sheet_id) = self.sheet.as_ref().map(|s| s.id.clone()) else {
            return;
        };
        for CellWrite { address, value } in writes {
            let seq = self.ledger.issue(&sheet_id, &address);
            self.send(DBRequest::WriteCell {
                sheet_id: sheet_id.clone(),
                address,
                value,
                seq,
            });
        }
    }

    // ===== columns =====

    /// Shift the focused column left (`-1`) or right (`+1`).
    pub fn move_focused_column(&mut self, delta: isize) {
        let Some(sheet) = self.sheet.as_ref() else {
            return;
        };
        let Some(addr) = self.grid.focused_cell() else {
            self.status = "Focus a cell to move its column".into();
            return;
        };
        let Some(index) = sheet.column_index(&addr.column) else {
            return;
        };
        let last = sheet.columns.len().saturating_sub(1);
        let target = index.saturating_add_signed(delta).min(last);
        let column_id = addr.column.clone();
        self.move_column(column_id, target);
    }

    pub fn move_column(&mut self, column_id: ColumnId, new_position: usize) {
        let Some(sheet) = self.sheet.as_ref() else {
            return;
        };
        if sheet.column_index(&column_id) == Some(new_position) {
            return;
        }
        let sheet_id = sheet.id.clone();
        self.send(DBRequest::MoveColumn {
            sheet_id,
            column_id,
            new_position,
        });
        self.status = "Moving column...".into();
    }

    pub fn begin_header_drag(&mut self, index: usize) {
        self.header_drag = self
            .sheet
            .as_ref()
            .and_then(|s| s.column_at(index))
            .map(|c| c.id.clone());
    }

    /// Drop a dragged header. `None` means it was released outside the headers.
    pub fn end_header_drag(&mut self, over: Option<usize>) {
        let Some(column_id) = self.header_drag.take() else {
            return;
        };
        if let Some(index) = over {
            self.move_column(column_id, index);
        }
    }

    // ===== prompts =====

    pub fn begin_prompt(&mut self, kind: PromptKind) {
        let input = match &kind {
            PromptKind::RenameSheet => match self.sheet.as_ref() {
                Some(s) => s.name.clone(),
                None => {
                    self.status = "Open a sheet first".into();
                    return;
                }
            },
            PromptKind::RenameColumn(id) => {
                match self
                    .sheet
                    .as_ref()
                    .and_then(|s| s.columns.iter().find(|c| &c.id == id))
                {
                    Some(c) => c.name.clone(),
                    None => return,
                }
            }
            PromptKind::NewColumn if self.sheet.is_none() => {
                self.status = "Open a sheet first".into();
                return;
            }
            _ => String::new(),
        };
        self.blur_grid();
        self.status = format!("{}: Enter to save, Esc to cancel", kind.label());
        self.prompt = Some(Prompt { kind, input });
    }

    /// Rename prompt for the column under focus.
    pub fn begin_rename_focused_column(&mut self) {
        match self.grid.focused_cell().map(|a| a.column.clone()) {
            Some(id) => self.begin_prompt(PromptKind::RenameColumn(id)),
            None => self.status = "Focus a cell to rename its column".into(),
        }
    }

    pub fn prompt_insert(&mut self, ch: char) {
        if let Some(p) = self.prompt.as_mut() {
            p.input.push(ch);
        }
    }

    pub fn prompt_backspace(&mut self) {
        if let Some(p) = self.prompt.as_mut() {
            p.input.pop();
        }
    }

    pub fn cancel_prompt(&mut self) {
        if let Some(p) = self.prompt.take() {
            self.status = format!("{} cancelled", p.kind.label());
        }
    }

    pub fn submit_prompt(&mut self) {
        let Some(Prompt { kind, input }) = self.prompt.take() else {
            return;
        };
        match &kind {
            PromptKind::NewSheet => {
                self.send(DBRequest::CreateSheet { name: input });
                self.status = "Creating sheet...".into();
            }
            PromptKind::RenameSheet => {
                let Some(sheet) = self.sheet.as_mut() else {
                    return;
                };
                let name = normalize_sheet_name(&input);
                sheet.name = name.clone();
                let sheet_id = sheet.id.clone();
                self.send(DBRequest::RenameSheet { sheet_id, name });
            }
            PromptKind::NewColumn | PromptKind::RenameColumn(_) => {
                let name = input.trim().to_string();
                if name.is_empty() {
                    self.status = "Column name cannot be empty".into();
                    return;
                }
                let Some(sheet_id) = self.sheet.as_ref().map(|s| s.id.clone()) else {
                    return;
                };
                let column_id = match &kind {
                    PromptKind::RenameColumn(id) => Some(id.clone()),
                    _ => None,
                };
                self.send(DBRequest::UpsertColumn {
                    sheet_id,
                    name,
                    column_id,
                });
                self.status = "Saving column...".into();
            }
        }
    }
}
