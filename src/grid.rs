//! Focus, selection and edit state for the sheet grid.
//!
//! Every transition runs to completion on one input event. Transitions that
//! commit an edit apply it to the sheet's cell map immediately and hand back
//! the [`CellWrite`]s the caller must persist.

use tracing::debug;

use crate::model::{CellAddress, Sheet};
use crate::selection::Selection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellMode {
    Idle,
    Focused(CellAddress),
    /// Editing implies focus on the same cell.
    Editing(CellAddress),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// A committed edit waiting to be persisted. `None` deletes the cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWrite {
    pub address: CellAddress,
    pub value: Option<String>,
}

/// Live drag-select session; exists only between pointer-down on the
/// selection handle and pointer-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DragSelect {
    pub anchor: CellAddress,
}

#[derive(Debug, Clone)]
pub struct GridState {
    mode: CellMode,
    edit_buffer: String,
    /// Byte offset into `edit_buffer`, always on a char boundary.
    cursor: usize,
    selection: Selection,
    row_count: usize,
    drag: Option<DragSelect>,
}

impl GridState {
    pub fn new(initial_rows: usize) -> Self {
        Self {
            mode: CellMode::Idle,
            edit_buffer: String::new(),
            cursor: 0,
            selection: Selection::default(),
            row_count: initial_rows.max(1),
            drag: None,
        }
    }

    /// Fresh state for a newly opened sheet; enough rows to show every stored cell.
    pub fn for_sheet(sheet: &Sheet, initial_rows: usize) -> Self {
        let mut state = Self::new(initial_rows);
        if let Some(max_row) = sheet.cells.max_row() {
            state.row_count = state.row_count.max(max_row + 1);
        }
        state
    }

    pub fn mode(&self) -> &CellMode {
        &self.mode
    }

    pub fn focused_cell(&self) -> Option<&CellAddress> {
        match &self.mode {
            CellMode::Idle => None,
            CellMode::Focused(a) | CellMode::Editing(a) => Some(a),
        }
    }

    pub fn editing_cell(&self) -> Option<&CellAddress> {
        match &self.mode {
            CellMode::Editing(a) => Some(a),
            _ => None,
        }
    }

    pub fn edit_buffer(&self) -> &str {
        &self.edit_buffer
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn drag(&self) -> Option<&DragSelect> {
        self.drag.as_ref()
    }

    pub fn is_editing(&self) -> bool {
        matches!(self.mode, CellMode::Editing(_))
    }

    // ===== pointer =====

    /// Pointer click on `addr`. Shift with an anchor extends the selection;
    /// a second click on the focused cell starts editing; anything else moves
    /// focus, committing an edit in progress elsewhere first.
    pub fn click(&mut self, sheet: &mut Sheet, addr: CellAddress, shift: bool) -> Vec<CellWrite> {
        if !self.in_bounds(sheet, &addr) {
            return Vec::new();
        }
        if shift && self.selection.anchor().is_some() {
            self.selection.extend_to(sheet, addr);
            return Vec::new();
        }
        match &self.mode {
            CellMode::Editing(cur) if *cur == addr => return Vec::new(),
            CellMode::Focused(cur) if *cur == addr => {
                self.begin_edit(sheet, addr);
                return Vec::new();
            }
            _ => {}
        }
        let writes = self.commit_pending(sheet).into_iter().collect();
        self.focus(sheet, addr);
        writes
    }

    /// Pointer-down on a cell. Returns true when it hit the selection handle
    /// and a drag-select session started.
    pub fn begin_drag(&mut self, addr: &CellAddress) -> bool {
        let Some(anchor) = self.selection.anchor().cloned() else {
            return false;
        };
        if self.selection.last() != Some(addr) {
            return false;
        }
        debug!(anchor = %anchor.legacy_key(), "drag-select started");
        self.drag = Some(DragSelect { anchor });
        true
    }

    pub fn drag_to(&mut self, sheet: &Sheet, addr: CellAddress) {
        if self.drag.is_none() || !self.in_bounds(sheet, &addr) {
            return;
        }
        self.selection.extend_to(sheet, addr);
    }

    pub fn end_drag(&mut self) {
        if self.drag.take().is_some() {
            debug!(cells = self.selection.cells().len(), "drag-select finished");
        }
    }

    // ===== keyboard =====

    /// Printable character. Starts an edit seeded with `ch` when focused,
    /// inserts at the cursor when already editing.
    pub fn type_char(&mut self, ch: char) {
        match &self.mode {
            CellMode::Idle => {}
            CellMode::Focused(addr) => {
                self.mode = CellMode::Editing(addr.clone());
                self.edit_buffer.clear();
                self.edit_buffer.push(ch);
                self.cursor = self.edit_buffer.len();
            }
            CellMode::Editing(_) => {
                self.edit_buffer.insert(self.cursor, ch);
                self.cursor += ch.len_utf8();
            }
        }
    }

    /// Drops focus and any edit in progress without writing anything.
    pub fn escape(&mut self) {
        if let CellMode::Editing(addr) = &self.mode {
            debug!(cell = %addr.legacy_key(), "edit discarded");
        }
        self.mode = CellMode::Idle;
        self.edit_buffer.clear();
        self.cursor = 0;
        self.drag = None;
    }

    /// Commit (when editing) and move one row down, growing the grid at the
    /// bottom edge.
    pub fn enter(&mut self, sheet: &mut Sheet) -> Vec<CellWrite> {
        let addr = match &self.mode {
            CellMode::Idle => return Vec::new(),
            CellMode::Focused(a) | CellMode::Editing(a) => a.clone(),
        };
        let mut writes = Vec::new();
        let committed = self.commit_pending(sheet);
        let committed_value = committed.as_ref().is_some_and(|w| w.value.is_some());
        writes.extend(committed);

        let next = CellAddress::new(addr.column.clone(), addr.row + 1);
        if next.row >= self.row_count {
            self.grow_rows(sheet);
            if committed_value {
                sheet.cells.set(&next, None);
                writes.push(CellWrite {
                    address: next.clone(),
                    value: None,
                });
            }
        }
        self.focus(sheet, next);
        writes
    }

    /// Focus left the grid. An edit in progress is committed.
    pub fn blur(&mut self, sheet: &mut Sheet) -> Vec<CellWrite> {
        self.drag = None;
        let Some(write) = self.commit_pending(sheet) else {
            return Vec::new();
        };
        self.mode = CellMode::Idle;
        self.edit_buffer.clear();
        self.cursor = 0;
        vec![write]
    }

    /// Arrow navigation while focused. With shift and an anchor the selection
    /// head moves instead of the focus.
    pub fn arrow(&mut self, sheet: &Sheet, dir: Direction, shift: bool) {
        let CellMode::Focused(cur) = &self.mode else {
            return;
        };
        if shift && self.selection.anchor().is_some() {
            let from = self.selection.head().unwrap_or(cur).clone();
            if let Some(target) = self.step(sheet, &from, dir) {
                self.selection.extend_to(sheet, target);
            }
            return;
        }
        if let Some(target) = self.step(sheet, &cur.clone(), dir) {
            self.focus(sheet, target);
        }
    }

    // ===== edit buffer =====

    pub fn backspace(&mut self) {
        if self.is_editing() && self.cursor > 0 {
            let start = prev_boundary(&self.edit_buffer, self.cursor);
            self.edit_buffer.drain(start..self.cursor);
            self.cursor = start;
        }
    }

    pub fn delete(&mut self) {
        if self.is_editing() && self.cursor < self.edit_buffer.len() {
            let end = next_boundary(&self.edit_buffer, self.cursor);
            self.edit_buffer.drain(self.cursor..end);
        }
    }

    pub fn cursor_left(&mut self) {
        if self.is_editing() {
            self.cursor = prev_boundary(&self.edit_buffer, self.cursor);
        }
    }

    pub fn cursor_right(&mut self) {
        if self.is_editing() {
            self.cursor = next_boundary(&self.edit_buffer, self.cursor);
        }
    }

    pub fn cursor_home(&mut self) {
        if self.is_editing() {
            self.cursor = 0;
        }
    }

    pub fn cursor_end(&mut self) {
        if self.is_editing() {
            self.cursor = self.edit_buffer.len();
        }
    }

    // ===== external changes =====

    /// Reconcile with a new column list: focus on a vanished column is
    /// dropped and the selection is recomputed in the new display order.
    pub fn sync_columns(&mut self, sheet: &Sheet) {
        if let Some(addr) = self.focused_cell()
            && sheet.column_index(&addr.column).is_none()
        {
            self.mode = CellMode::Idle;
            self.edit_buffer.clear();
            self.cursor = 0;
        }
        if let Some(drag) = &self.drag
            && sheet.column_index(&drag.anchor.column).is_none()
        {
            self.drag = None;
        }
        self.selection.refresh(sheet);
    }

    /// Rows only ever grow; far-out sparse cells pull the count past them.
    pub fn grow_rows(&mut self, sheet: &Sheet) {
        let by_content = sheet.cells.max_row().map_or(0, |r| r + 2);
        let grown = by_content.max(self.row_count + 1);
        debug!(from = self.row_count, to = grown, "row count grown");
        self.row_count = grown;
    }

    // ===== internals =====

    fn in_bounds(&self, sheet: &Sheet, addr: &CellAddress) -> bool {
        addr.row < self.row_count && sheet.column_index(&addr.column).is_some()
    }

    fn focus(&mut self, sheet: &Sheet, addr: CellAddress) {
        self.edit_buffer = sheet.value(&addr).unwrap_or_default().to_string();
        self.cursor = self.edit_buffer.len();
        self.selection = Selection::single(addr.clone());
        self.mode = CellMode::Focused(addr);
    }

    fn begin_edit(&mut self, sheet: &Sheet, addr: CellAddress) {
        self.edit_buffer = sheet.value(&addr).unwrap_or_default().to_string();
        self.cursor = self.edit_buffer.len();
        self.mode = CellMode::Editing(addr);
    }

    /// Commit the edit buffer if editing, even when blank (blank deletes).
    fn commit_pending(&mut self, sheet: &mut Sheet) -> Option<CellWrite> {
        let CellMode::Editing(addr) = &self.mode else {
            return None;
        };
        let addr = addr.clone();
        let trimmed = self.edit_buffer.trim();
        let value = (!trimmed.is_empty()).then(|| trimmed.to_string());
        sheet.cells.set(&addr, value.as_deref());
        debug!(cell = %addr.legacy_key(), empty = value.is_none(), "edit committed");
        self.mode = CellMode::Focused(addr.clone());
        Some(CellWrite {
            address: addr,
            value,
        })
    }

    fn step(&self, sheet: &Sheet, from: &CellAddress, dir: Direction) -> Option<CellAddress> {
        let col = sheet.column_index(&from.column)?;
        let last_col = sheet.columns.len().saturating_sub(1);
        let last_row = self.row_count.saturating_sub(1);
        let (col, row) = match dir {
            Direction::Up => (col, from.row.saturating_sub(1)),
            Direction::Down => (col, (from.row + 1).min(last_row)),
            Direction::Left => (col.saturating_sub(1), from.row),
            Direction::Right => ((col + 1).min(last_col), from.row),
        };
        let column = sheet.column_at(col)?;
        Some(CellAddress::new(column.id.clone(), row.min(last_row)))
    }
}

fn prev_boundary(s: &str, idx: usize) -> usize {
    s[..idx].char_indices().next_back().map_or(0, |(i, _)| i)
}

fn next_boundary(s: &str, idx: usize) -> usize {
    s[idx..].chars().next().map_or(idx, |c| idx + c.len_utf8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellMap, Column, ColumnId};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn sheet(n: usize) -> Sheet {
        let columns = (0..n)
            .map(|i| Column {
                id: ColumnId(format!("col-{i}")),
                name: format!("C{i}"),
                position: i,
                sheet_id: "s".into(),
            })
            .collect();
        Sheet::new("s".into(), "S".into(), columns, CellMap::new())
    }

    fn at(col: usize, row: usize) -> CellAddress {
        CellAddress::new(format!("col-{col}"), row)
    }

    fn edit(grid: &mut GridState, sheet: &mut Sheet, addr: CellAddress, text: &str) {
        grid.click(sheet, addr.clone(), false);
        grid.click(sheet, addr, false);
        while !grid.edit_buffer().is_empty() {
            grid.cursor_end();
            grid.backspace();
        }
        for ch in text.chars() {
            grid.type_char(ch);
        }
    }

    #[test]
    fn click_focuses_then_edits() {
        let mut s = sheet(3);
        s.cells.set(&at(1, 1), Some("old"));
        let mut g = GridState::new(10);

        assert!(g.click(&mut s, at(1, 1), false).is_empty());
        assert_eq!(g.mode(), &CellMode::Focused(at(1, 1)));
        assert_eq!(g.selection().cells(), &[at(1, 1)]);

        g.click(&mut s, at(1, 1), false);
        assert_eq!(g.mode(), &CellMode::Editing(at(1, 1)));
        assert_eq!(g.edit_buffer(), "old");
        assert_eq!(g.cursor(), 3);
    }

    #[test]
    fn printable_key_replaces_value() {
        let mut s = sheet(2);
        s.cells.set(&at(0, 0), Some("before"));
        let mut g = GridState::new(10);
        g.click(&mut s, at(0, 0), false);
        g.type_char('z');
        assert_eq!(g.editing_cell(), Some(&at(0, 0)));
        assert_eq!(g.edit_buffer(), "z");
        g.type_char('q');
        assert_eq!(g.edit_buffer(), "zq");
    }

    #[test]
    fn typing_while_idle_does_nothing() {
        let mut g = GridState::new(10);
        g.type_char('a');
        assert_eq!(g.mode(), &CellMode::Idle);
        assert_eq!(g.edit_buffer(), "");
    }

    #[test]
    fn commit_empty_deletes_and_value_sets() {
        let mut s = sheet(2);
        s.cells.set(&at(0, 3), Some("gone soon"));
        let mut g = GridState::new(10);

        edit(&mut g, &mut s, at(0, 3), "");
        let writes = g.enter(&mut s);
        assert_eq!(writes, vec![CellWrite { address: at(0, 3), value: None }]);
        assert_eq!(s.value(&at(0, 3)), None);

        edit(&mut g, &mut s, at(1, 2), "  x ");
        let writes = g.blur(&mut s);
        assert_eq!(
            writes,
            vec![CellWrite { address: at(1, 2), value: Some("x".into()) }]
        );
        assert_eq!(s.value(&at(1, 2)), Some("x"));
        assert_eq!(g.mode(), &CellMode::Idle);
    }

    #[test]
    fn enter_on_last_row_grows_and_keeps_new_cell_blank() {
        let mut s = sheet(2);
        s.cells.set(&at(0, 10), Some("stale"));
        let mut g = GridState::new(10);

        edit(&mut g, &mut s, at(0, 9), "hello");
        let writes = g.enter(&mut s);

        assert!(g.row_count() >= 11);
        assert_eq!(s.value(&at(0, 9)), Some("hello"));
        assert_eq!(s.value(&at(0, 10)), None);
        assert_eq!(
            writes,
            vec![
                CellWrite { address: at(0, 9), value: Some("hello".into()) },
                CellWrite { address: at(0, 10), value: None },
            ]
        );
        assert_eq!(g.mode(), &CellMode::Focused(at(0, 10)));
    }

    #[test]
    fn enter_with_empty_commit_skips_clear() {
        let mut s = sheet(1);
        let mut g = GridState::new(10);
        edit(&mut g, &mut s, at(0, 9), "");
        let writes = g.enter(&mut s);
        assert_eq!(writes.len(), 1);
        assert_eq!(g.row_count(), 11);
    }

    #[test]
    fn enter_while_focused_moves_without_writing() {
        let mut s = sheet(1);
        s.cells.set(&at(0, 10), Some("kept"));
        let mut g = GridState::new(10);
        g.click(&mut s, at(0, 9), false);

        let writes = g.enter(&mut s);

        assert!(writes.is_empty());
        assert_eq!(g.row_count(), 12);
        assert_eq!(g.mode(), &CellMode::Focused(at(0, 10)));
        assert_eq!(s.value(&at(0, 10)), Some("kept"));
        assert_eq!(g.edit_buffer(), "kept");
    }

    #[test]
    fn enter_mid_grid_moves_down_without_growth() {
        let mut s = sheet(1);
        s.cells.set(&at(0, 4), Some("below"));
        let mut g = GridState::new(10);
        edit(&mut g, &mut s, at(0, 3), "v");
        g.enter(&mut s);
        assert_eq!(g.row_count(), 10);
        assert_eq!(g.focused_cell(), Some(&at(0, 4)));
        assert_eq!(g.edit_buffer(), "below");
    }

    #[test]
    fn row_growth_accounts_for_sparse_cells() {
        let mut s = sheet(1);
        s.cells.set(&at(0, 30), Some("far"));
        let mut g = GridState::new(10);
        g.grow_rows(&s);
        assert_eq!(g.row_count(), 32);
        g.grow_rows(&s);
        assert_eq!(g.row_count(), 33);
    }

    #[test]
    fn for_sheet_shows_all_stored_rows() {
        let mut s = sheet(1);
        s.cells.set(&at(0, 14), Some("deep"));
        assert_eq!(GridState::for_sheet(&s, 10).row_count(), 15);
        assert_eq!(GridState::for_sheet(&sheet(1), 10).row_count(), 10);
    }

    #[test]
    fn escape_never_writes() {
        let mut s = sheet(2);
        s.cells.set(&at(0, 0), Some("keep"));
        let mut g = GridState::new(10);
        edit(&mut g, &mut s, at(0, 0), "changed");
        g.escape();
        assert_eq!(g.mode(), &CellMode::Idle);
        assert_eq!(s.value(&at(0, 0)), Some("keep"));
        assert!(g.blur(&mut s).is_empty());
        assert!(g.enter(&mut s).is_empty());
    }

    #[test]
    fn clicking_elsewhere_commits_edit() {
        let mut s = sheet(2);
        let mut g = GridState::new(10);
        edit(&mut g, &mut s, at(0, 0), "a");
        let writes = g.click(&mut s, at(1, 1), false);
        assert_eq!(writes.len(), 1);
        assert_eq!(s.value(&at(0, 0)), Some("a"));
        assert_eq!(g.mode(), &CellMode::Focused(at(1, 1)));
    }

    #[test]
    fn arrows_clamp_and_reseed() {
        let mut s = sheet(3);
        s.cells.set(&at(1, 0), Some("right"));
        let mut g = GridState::new(5);
        g.click(&mut s, at(0, 0), false);

        g.arrow(&s, Direction::Up, false);
        g.arrow(&s, Direction::Left, false);
        assert_eq!(g.focused_cell(), Some(&at(0, 0)));

        g.arrow(&s, Direction::Right, false);
        assert_eq!(g.focused_cell(), Some(&at(1, 0)));
        assert_eq!(g.edit_buffer(), "right");

        for _ in 0..10 {
            g.arrow(&s, Direction::Down, false);
            g.arrow(&s, Direction::Right, false);
        }
        assert_eq!(g.focused_cell(), Some(&at(2, 4)));
    }

    #[test]
    fn shift_arrow_extends_from_head() {
        let mut s = sheet(4);
        let mut g = GridState::new(10);
        g.click(&mut s, at(1, 1), false);
        g.arrow(&s, Direction::Right, true);
        g.arrow(&s, Direction::Right, true);
        g.arrow(&s, Direction::Down, true);
        assert_eq!(g.focused_cell(), Some(&at(1, 1)));
        assert_eq!(g.selection().cells().len(), 6);
        assert_eq!(g.selection().last(), Some(&at(3, 2)));
    }

    #[test]
    fn shift_click_extends_selection() {
        let mut s = sheet(3);
        let mut g = GridState::new(10);
        g.click(&mut s, at(0, 2), false);
        g.click(&mut s, at(2, 0), true);
        assert_eq!(g.focused_cell(), Some(&at(0, 2)));
        assert_eq!(g.selection().cells().len(), 9);
    }

    #[test]
    fn drag_select_from_handle_only() {
        let mut s = sheet(3);
        let mut g = GridState::new(10);
        g.click(&mut s, at(0, 0), false);
        g.click(&mut s, at(1, 1), true);

        assert!(!g.begin_drag(&at(0, 0)));
        assert!(g.drag().is_none());
        g.drag_to(&s, at(2, 2));
        assert_eq!(g.selection().cells().len(), 4);

        assert!(g.begin_drag(&at(1, 1)));
        g.drag_to(&s, at(2, 3));
        assert_eq!(g.selection().cells().len(), 12);
        g.drag_to(&s, at(0, 1));
        assert_eq!(g.selection().cells().len(), 2);
        g.end_drag();
        assert!(g.drag().is_none());

        g.drag_to(&s, at(2, 5));
        assert_eq!(g.selection().cells().len(), 2);
    }

    #[test]
    fn edit_buffer_handles_multibyte() {
        let mut s = sheet(1);
        let mut g = GridState::new(10);
        g.click(&mut s, at(0, 0), false);
        for ch in "aé€".chars() {
            g.type_char(ch);
        }
        g.cursor_left();
        g.backspace();
        assert_eq!(g.edit_buffer(), "a€");
        g.cursor_home();
        g.delete();
        assert_eq!(g.edit_buffer(), "€");
        g.cursor_end();
        assert_eq!(g.cursor(), "€".len());
    }

    #[test]
    fn sync_columns_drops_vanished_focus() {
        let mut s = sheet(2);
        let mut g = GridState::new(10);
        g.click(&mut s, at(1, 0), false);
        let kept = vec![s.columns[0].clone()];
        s.set_columns(kept);
        g.sync_columns(&s);
        assert_eq!(g.mode(), &CellMode::Idle);
        assert!(g.selection().is_empty());
    }

    proptest! {
        #[test]
        fn arrows_stay_in_bounds(
            cols in 1usize..6,
            rows in 1usize..12,
            start_col in 0usize..6,
            start_row in 0usize..12,
            moves in prop::collection::vec((0u8..4, any::<bool>()), 0..64),
        ) {
            let mut s = sheet(cols);
            let mut g = GridState::new(rows);
            g.click(&mut s, at(start_col.min(cols - 1), start_row.min(rows - 1)), false);
            for (d, shift) in moves {
                let dir = match d {
                    0 => Direction::Up,
                    1 => Direction::Down,
                    2 => Direction::Left,
                    _ => Direction::Right,
                };
                g.arrow(&s, dir, shift);
                let f = g.focused_cell().unwrap();
                let ci = s.column_index(&f.column).unwrap();
                prop_assert!(ci < cols);
                prop_assert!(f.row < g.row_count());
                if let Some(head) = g.selection().head() {
                    prop_assert!(head.row < g.row_count());
                }
            }
        }
    }
}
