use std::ops::RangeInclusive;

use crate::model::{CellAddress, Sheet};

/// Rectangle in (column display index × row) space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rect {
    pub cols: RangeInclusive<usize>,
    pub rows: RangeInclusive<usize>,
}

impl Rect {
    /// Normalized rectangle spanning both corners, whichever order they come in.
    pub fn spanning(a: (usize, usize), b: (usize, usize)) -> Self {
        Self {
            cols: a.0.min(b.0)..=a.0.max(b.0),
            rows: a.1.min(b.1)..=a.1.max(b.1),
        }
    }

    pub fn contains(&self, col: usize, row: usize) -> bool {
        self.cols.contains(&col) && self.rows.contains(&row)
    }

    pub fn len(&self) -> usize {
        (self.cols.end() - self.cols.start() + 1) * (self.rows.end() - self.rows.start() + 1)
    }
}

/// Map both addresses through the sheet's current display order and return the
/// rectangle between them. `None` if either column is not on the sheet.
pub fn rect_between(sheet: &Sheet, anchor: &CellAddress, target: &CellAddress) -> Option<Rect> {
    let a = sheet.column_index(&anchor.column)?;
    let b = sheet.column_index(&target.column)?;
    Some(Rect::spanning((a, anchor.row), (b, target.row)))
}

/// Every cell in the rectangle, column-major, so the last entry is the
/// bottom-right corner.
pub fn cells_in(sheet: &Sheet, rect: &Rect) -> Vec<CellAddress> {
    let mut out = Vec::with_capacity(rect.len());
    for ci in rect.cols.clone() {
        let Some(column) = sheet.column_at(ci) else {
            break;
        };
        for row in rect.rows.clone() {
            out.push(CellAddress::new(column.id.clone(), row));
        }
    }
    out
}

/// The active selection: the anchor it grew from, the moving corner, and the
/// materialized cell set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    anchor: Option<CellAddress>,
    head: Option<CellAddress>,
    cells: Vec<CellAddress>,
}

impl Selection {
    pub fn single(addr: CellAddress) -> Self {
        Self {
            anchor: Some(addr.clone()),
            head: Some(addr.clone()),
            cells: vec![addr],
        }
    }

    pub fn anchor(&self) -> Option<&CellAddress> {
        self.anchor.as_ref()
    }

    pub fn head(&self) -> Option<&CellAddress> {
        self.head.as_ref()
    }

    pub fn cells(&self) -> &[CellAddress] {
        &self.cells
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains(&self, addr: &CellAddress) -> bool {
        self.cells.iter().any(|c| c == addr)
    }

    /// Cell carrying the drag handle.
    pub fn last(&self) -> Option<&CellAddress> {
        self.cells.last()
    }

    /// Grow from the existing anchor to `head`. No-op without an anchor.
    pub fn extend_to(&mut self, sheet: &Sheet, head: CellAddress) -> bool {
        let Some(anchor) = self.anchor.as_ref() else {
            return false;
        };
        let Some(rect) = rect_between(sheet, anchor, &head) else {
            return false;
        };
        self.cells = cells_in(sheet, &rect);
        self.head = Some(head);
        true
    }

    /// Recompute the cell set after the column order changed.
    pub fn refresh(&mut self, sheet: &Sheet) {
        let (Some(anchor), Some(head)) = (self.anchor.clone(), self.head.clone()) else {
            return;
        };
        match rect_between(sheet, &anchor, &head) {
            Some(rect) => self.cells = cells_in(sheet, &rect),
            None => self.clear(),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellMap, Column, ColumnId};
    use pretty_assertions::assert_eq;

    fn sheet(ids: &[&str]) -> Sheet {
        let columns = ids
            .iter()
            .enumerate()
            .map(|(i, id)| Column {
                id: ColumnId::from(*id),
                name: id.to_string(),
                position: i,
                sheet_id: "s".into(),
            })
            .collect();
        Sheet::new("s".into(), "S".into(), columns, CellMap::new())
    }

    #[test]
    fn reversed_corners_cover_nine_cells() {
        let sheet = sheet(&["a", "b", "c", "d"]);
        let anchor = CellAddress::new("a", 2);
        let target = CellAddress::new("c", 0);
        let rect = rect_between(&sheet, &anchor, &target).unwrap();
        assert_eq!(rect, Rect { cols: 0..=2, rows: 0..=2 });

        let cells = cells_in(&sheet, &rect);
        assert_eq!(cells.len(), 9);
        for id in ["a", "b", "c"] {
            for row in 0..3 {
                assert!(cells.contains(&CellAddress::new(id, row)));
            }
        }
        assert!(!cells.iter().any(|c| c.column.as_str() == "d"));
        assert_eq!(cells.last(), Some(&CellAddress::new("c", 2)));
    }

    #[test]
    fn extend_requires_anchor() {
        let sheet = sheet(&["a", "b"]);
        let mut sel = Selection::default();
        assert!(!sel.extend_to(&sheet, CellAddress::new("b", 1)));
        assert!(sel.is_empty());

        let mut sel = Selection::single(CellAddress::new("a", 0));
        assert!(sel.extend_to(&sheet, CellAddress::new("b", 1)));
        assert_eq!(sel.cells().len(), 4);
        assert_eq!(sel.head(), Some(&CellAddress::new("b", 1)));
        assert_eq!(sel.anchor(), Some(&CellAddress::new("a", 0)));
    }

    #[test]
    fn refresh_follows_new_column_order() {
        let mut s = sheet(&["a", "b", "c"]);
        let mut sel = Selection::single(CellAddress::new("a", 0));
        sel.extend_to(&s, CellAddress::new("b", 0));
        assert_eq!(sel.cells().len(), 2);

        // move "c" between "a" and "b"
        s.columns[2].position = 1;
        s.columns[1].position = 2;
        let cols = s.columns.clone();
        s.set_columns(cols);
        sel.refresh(&s);
        assert_eq!(sel.cells().len(), 3);
        assert!(sel.contains(&CellAddress::new("c", 0)));

        let without_a: Vec<Column> = s
            .columns
            .iter()
            .filter(|c| c.id.as_str() != "a")
            .cloned()
            .collect();
        s.set_columns(without_a);
        sel.refresh(&s);
        assert!(sel.is_empty());
        assert_eq!(sel.anchor(), None);
    }
}
