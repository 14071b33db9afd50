use crate::app::{App, Focus};
use crate::grid::CellMode;
use crate::model::CellAddress;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table},
};

/// Marker drawn in the last cell of the selection; pressing on it starts a
/// drag-select.
const HANDLE: char = '◢';
const SPACING: u16 = 1;

/// Where the grid landed on screen during the last draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    /// Inside the block borders
    pub inner: Rect,
    pub gutter: u16,
    pub col_width: u16,
    pub first_col: usize,
    pub first_row: usize,
    pub visible_cols: usize,
    pub visible_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hit {
    Header(usize),
    Cell { col: usize, row: usize, handle: bool },
}

impl GridLayout {
    fn col_x(&self, visible_index: usize) -> u16 {
        self.inner.x + self.gutter + SPACING + visible_index as u16 * (self.col_width + SPACING)
    }

    /// Map a terminal position to a column header or a cell.
    pub fn hit(&self, x: u16, y: u16) -> Option<Hit> {
        if !contains(self.inner, x, y) {
            return None;
        }
        let (vi, offset) = (0..self.visible_cols).find_map(|i| {
            let cx = self.col_x(i);
            (x >= cx && x < cx + self.col_width).then(|| (i, x - cx))
        })?;
        let col = self.first_col + vi;
        if y == self.inner.y {
            return Some(Hit::Header(col));
        }
        let vr = (y - self.inner.y - 1) as usize;
        if vr >= self.visible_rows {
            return None;
        }
        Some(Hit::Cell {
            col,
            row: self.first_row + vr,
            handle: offset + 1 == self.col_width,
        })
    }
}

fn contains(r: Rect, x: u16, y: u16) -> bool {
    x >= r.x && x < r.x + r.width && y >= r.y && y < r.y + r.height
}

/// Index of the sheet list entry drawn at (x, y), if any. `offset` is the
/// list's scroll offset from the last render.
pub fn sheet_at(area: Rect, offset: usize, x: u16, y: u16) -> Option<usize> {
    let inner = Block::default().borders(Borders::ALL).inner(area);
    contains(inner, x, y).then(|| offset + (y - inner.y) as usize)
}

pub fn draw(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(2)].as_ref())
        .split(f.size());

    let top = chunks[0];
    let status_area = chunks[1];

    let body_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(28), Constraint::Min(10)].as_ref())
        .split(top);

    app.sheets_area = body_chunks[0];
    draw_sheets(f, body_chunks[0], app);
    draw_grid(f, body_chunks[1], app);
    draw_status(f, status_area, app);
}

fn pane_block(title: String, active: bool) -> Block<'static> {
    let mut block = Block::default().borders(Borders::ALL).title(title);
    if active {
        block = block.border_style(Style::default().fg(Color::Cyan));
    }
    block
}

fn draw_sheets(f: &mut Frame, area: Rect, app: &mut App) {
    let items: Vec<ListItem> = app
        .sheets
        .iter()
        .map(|s| ListItem::new(s.name.clone()))
        .collect();

    let list = List::new(items)
        .block(pane_block("Sheets".into(), app.focus == Focus::Sheets))
        .highlight_style(
            Style::default()
                .add_modifier(Modifier::BOLD)
                .fg(Color::Yellow),
        );

    // The state outlives the frame so the scroll offset is known to hit-testing
    let selected = (!app.sheets.is_empty()).then_some(app.selected_sheet);
    app.sheet_list.select(selected);
    f.render_stateful_widget(list, area, &mut app.sheet_list);
}

fn mode_label(app: &App) -> &'static str {
    if app.prompt.is_some() {
        return "INPUT";
    }
    if app.grid.drag().is_some() {
        return "SELECT";
    }
    match app.grid.mode() {
        CellMode::Idle => "IDLE",
        CellMode::Focused(_) => "FOCUS",
        CellMode::Editing(_) => "EDIT",
    }
}

fn draw_status(f: &mut Frame, area: Rect, app: &App) {
    let mode = mode_label(app);
    let tail = match (&app.prompt, app.grid.mode()) {
        (Some(p), _) => Span::styled(
            format!(" | {}: {}_", p.kind.label(), p.input),
            Style::default().fg(Color::Yellow),
        ),
        (None, CellMode::Editing(_)) => Span::raw(format!(" | {}", app.grid.edit_buffer())),
        _ => {
            let n = app.grid.selection().cells().len();
            if n > 1 {
                Span::raw(format!(" | {n} cells selected"))
            } else {
                Span::raw("")
            }
        }
    };
    let mut spans = vec![
        Span::styled(
            format!("[{mode}] "),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(app.status.as_str()),
        tail,
    ];
    let unsaved = app.ledger.pending();
    if unsaved > 0 {
        spans.push(Span::styled(
            format!(" | {unsaved} unsaved"),
            Style::default().fg(Color::DarkGray),
        ));
    }
    let text = Line::from(spans);
    let p = Paragraph::new(text).block(Block::default().borders(Borders::TOP));
    f.render_widget(p, area);
}

fn draw_grid(f: &mut Frame, area: Rect, app: &mut App) {
    let Some(sheet) = app.sheet.as_ref() else {
        let msg = if app.loading.is_some() {
            "Loading..."
        } else {
            "Select a sheet and press Enter"
        };
        f.render_widget(Paragraph::new(msg).block(pane_block("Grid".into(), false)), area);
        app.layout = None;
        return;
    };
    let block = pane_block(sheet.name.clone(), app.focus == Focus::Grid);
    let inner = block.inner(area);

    if sheet.columns.is_empty() {
        let p = Paragraph::new("No columns yet. Ctrl-n adds one.").block(block);
        f.render_widget(p, area);
        app.layout = None;
        return;
    }

    let row_count = app.grid.row_count();
    let gutter = (row_count.to_string().len() as u16).max(3);
    let col_width = app.column_width;
    let visible_cols = ((inner.width.saturating_sub(gutter) / (col_width + SPACING)) as usize)
        .clamp(1, sheet.columns.len());
    let visible_rows = (inner.height.saturating_sub(1) as usize).clamp(1, row_count);

    // keep the focused cell (or the drag head) on screen
    let follow = app
        .grid
        .drag()
        .and_then(|_| app.grid.selection().head())
        .or(app.grid.focused_cell());
    if let Some(addr) = follow
        && let Some(ci) = sheet.column_index(&addr.column)
    {
        app.scroll_col = scroll_to(app.scroll_col, ci, visible_cols);
        app.scroll_row = scroll_to(app.scroll_row, addr.row, visible_rows);
    }
    app.scroll_col = app.scroll_col.min(sheet.columns.len() - visible_cols);
    app.scroll_row = app.scroll_row.min(row_count - visible_rows);

    let layout = GridLayout {
        inner,
        gutter,
        col_width,
        first_col: app.scroll_col,
        first_row: app.scroll_row,
        visible_cols,
        visible_rows,
    };

    let shown = &sheet.columns[layout.first_col..layout.first_col + visible_cols];
    let mut widths = vec![Constraint::Length(gutter)];
    widths.extend(shown.iter().map(|_| Constraint::Length(col_width)));

    let header = Row::new(
        std::iter::once(Cell::from(""))
            .chain(shown.iter().map(|c| Cell::from(fit(&c.name, col_width as usize)))),
    )
    .style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    );

    let handle_cell = app.grid.selection().last();
    let mut rows = Vec::with_capacity(visible_rows);
    for row in layout.first_row..layout.first_row + visible_rows {
        let mut cells = Vec::with_capacity(shown.len() + 1);
        cells.push(Cell::from(row.to_string()).style(Style::default().fg(Color::DarkGray)));
        for column in shown {
            let addr = CellAddress::new(column.id.clone(), row);
            let focused = app.grid.focused_cell() == Some(&addr);
            let editing = app.grid.editing_cell() == Some(&addr);
            let width = col_width as usize;

            let mut text = if editing {
                edit_window(app.grid.edit_buffer(), app.grid.cursor(), width).0
            } else {
                fit(sheet.value(&addr).unwrap_or_default(), width)
            };
            if !editing && handle_cell == Some(&addr) {
                text = fit(&text, width - 1);
                text.push(HANDLE);
            }

            let mut cell = Cell::from(text);
            if editing {
                cell = cell.style(Style::default().bg(Color::Yellow).fg(Color::Black));
            } else if focused {
                cell = cell.style(Style::default().bg(Color::Blue).fg(Color::Black));
            } else if app.grid.selection().contains(&addr) {
                cell = cell.style(Style::default().bg(Color::LightBlue).fg(Color::Black));
            }
            cells.push(cell);
        }
        rows.push(Row::new(cells));
    }

    let table = Table::new(rows, widths)
        .header(header)
        .block(block)
        .column_spacing(SPACING);

    f.render_widget(table, area);

    if let Some(addr) = app.grid.editing_cell()
        && let Some(ci) = sheet.column_index(&addr.column)
        && ci >= layout.first_col
        && addr.row >= layout.first_row
        && addr.row < layout.first_row + visible_rows
    {
        let (_, cursor_col) =
            edit_window(app.grid.edit_buffer(), app.grid.cursor(), col_width as usize);
        let x = layout.col_x(ci - layout.first_col) + cursor_col as u16;
        let y = inner.y + 1 + (addr.row - layout.first_row) as u16;
        f.set_cursor(x, y);
    }

    app.layout = Some(layout);
}

/// Smallest scroll offset change that keeps `target` inside a window of `len`.
fn scroll_to(offset: usize, target: usize, len: usize) -> usize {
    if target < offset {
        target
    } else if target >= offset + len {
        target + 1 - len
    } else {
        offset
    }
}

/// Truncate to `width` chars, padding so the cell background fills.
fn fit(s: &str, width: usize) -> String {
    let mut out: String = s.chars().take(width).collect();
    let n = out.chars().count();
    out.extend(std::iter::repeat_n(' ', width - n));
    out
}

/// Visible slice of the edit buffer and the cursor column inside it.
fn edit_window(buffer: &str, cursor: usize, width: usize) -> (String, usize) {
    let cursor_chars = buffer[..cursor].chars().count();
    let usable = width.saturating_sub(1).max(1);
    let start = cursor_chars.saturating_sub(usable);
    let text: String = buffer.chars().skip(start).take(width).collect();
    (fit(&text, width), cursor_chars - start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SheetSummary;
    use pretty_assertions::assert_eq;
    use ratatui::{Terminal, backend::TestBackend};

    fn layout() -> GridLayout {
        GridLayout {
            inner: Rect::new(31, 1, 60, 20),
            gutter: 3,
            col_width: 10,
            first_col: 2,
            first_row: 5,
            visible_cols: 4,
            visible_rows: 19,
        }
    }

    #[test]
    fn hit_maps_headers_cells_and_handle() {
        let l = layout();
        // first column starts after the gutter and one space
        assert_eq!(l.hit(35, 1), Some(Hit::Header(2)));
        assert_eq!(l.hit(35, 2), Some(Hit::Cell { col: 2, row: 5, handle: false }));
        assert_eq!(l.hit(44, 2), Some(Hit::Cell { col: 2, row: 5, handle: true }));
        // spacing column between cells
        assert_eq!(l.hit(45, 2), None);
        assert_eq!(l.hit(46, 4), Some(Hit::Cell { col: 3, row: 7, handle: false }));
        assert_eq!(l.hit(32, 3), None);
        assert_eq!(l.hit(3, 1), None);
    }

    #[test]
    fn sheet_list_hits_skip_border() {
        let area = Rect::new(0, 0, 28, 22);
        assert_eq!(sheet_at(area, 0, 3, 1), Some(0));
        assert_eq!(sheet_at(area, 0, 3, 4), Some(3));
        assert_eq!(sheet_at(area, 5, 3, 4), Some(8));
        assert_eq!(sheet_at(area, 0, 3, 0), None);
        assert_eq!(sheet_at(area, 0, 0, 2), None);
    }

    #[test]
    fn scrolled_sheet_list_hits_drawn_entry() {
        let (req_tx, _req_rx) = crossbeam_channel::unbounded();
        let (_resp_tx, resp_rx) = crossbeam_channel::unbounded();
        let mut app = App::new(10, 12, req_tx, resp_rx);
        app.sheets = (0..30)
            .map(|i| SheetSummary {
                id: format!("s-{i}"),
                name: format!("sheet{i}"),
            })
            .collect();
        app.selected_sheet = 25;

        let mut terminal = Terminal::new(TestBackend::new(80, 12)).unwrap();
        terminal.draw(|f| draw(f, &mut app)).unwrap();
        assert!(app.sheet_list.offset() > 0);

        let buf = terminal.backend().buffer();
        let inner = Block::default().borders(Borders::ALL).inner(app.sheets_area);
        for y in inner.y..inner.y + inner.height {
            let drawn: String = (inner.x..inner.x + inner.width)
                .map(|x| buf.get(x, y).symbol())
                .collect();
            let index = sheet_at(app.sheets_area, app.sheet_list.offset(), 3, y).unwrap();
            assert_eq!(drawn.trim_end(), app.sheets[index].name);
        }
    }

    #[test]
    fn scroll_follows_target() {
        assert_eq!(scroll_to(0, 3, 10), 0);
        assert_eq!(scroll_to(0, 12, 10), 3);
        assert_eq!(scroll_to(8, 2, 10), 2);
    }

    #[test]
    fn edit_window_keeps_cursor_visible() {
        assert_eq!(edit_window("abc", 3, 6), ("abc   ".to_string(), 3));
        let (text, col) = edit_window("abcdefghij", 10, 5);
        assert_eq!(text, "ghij ");
        assert_eq!(col, 4);
        assert_eq!(fit("é€xyz", 3), "é€x");
    }
}
