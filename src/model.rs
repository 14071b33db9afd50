use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};
use tracing::warn;

/// Opaque column identifier. Store-generated ids are UUIDs and contain hyphens.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnId(pub String);

impl ColumnId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ColumnId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellAddress {
    pub column: ColumnId,
    pub row: usize,
}

impl CellAddress {
    pub fn new(column: impl Into<ColumnId>, row: usize) -> Self {
        Self {
            column: column.into(),
            row,
        }
    }

    /// Key used by the persisted cell blob: `"{columnId}-{rowIndex}"`.
    pub fn legacy_key(&self) -> String {
        format!("{}-{}", self.column, self.row)
    }

    /// Parse a persisted key. The row index is whatever follows the last hyphen,
    /// so hyphenated column ids survive.
    pub fn parse_legacy_key(key: &str) -> Option<Self> {
        let (column, row) = key.rsplit_once('-')?;
        if column.is_empty() {
            return None;
        }
        let row = row.parse::<usize>().ok()?;
        Some(Self::new(column, row))
    }
}

impl From<String> for ColumnId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Sparse cell values, keyed column first then row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellMap {
    columns: BTreeMap<ColumnId, BTreeMap<usize, String>>,
}

impl CellMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: &CellAddress) -> Option<&str> {
        self.columns
            .get(&addr.column)
            .and_then(|rows| rows.get(&addr.row))
            .map(|s| s.as_str())
    }

    /// Trims the value; blank or `None` deletes the entry.
    pub fn set(&mut self, addr: &CellAddress, value: Option<&str>) {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => {
                self.columns
                    .entry(addr.column.clone())
                    .or_default()
                    .insert(addr.row, v.to_string());
            }
            None => {
                if let Some(rows) = self.columns.get_mut(&addr.column) {
                    rows.remove(&addr.row);
                    if rows.is_empty() {
                        self.columns.remove(&addr.column);
                    }
                }
            }
        }
    }

    pub fn max_row(&self) -> Option<usize> {
        self.columns
            .values()
            .filter_map(|rows| rows.keys().next_back().copied())
            .max()
    }

    pub fn len(&self) -> usize {
        self.columns.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CellAddress, &str)> {
        self.columns.iter().flat_map(|(col, rows)| {
            rows.iter()
                .map(move |(row, v)| (CellAddress::new(col.clone(), *row), v.as_str()))
        })
    }

    pub fn to_legacy_json(&self) -> Value {
        let mut obj = Map::new();
        for (addr, value) in self.iter() {
            obj.insert(addr.legacy_key(), Value::String(value.to_string()));
        }
        Value::Object(obj)
    }

    pub fn from_legacy_json(value: &Value) -> Self {
        let mut cells = Self::new();
        let Some(obj) = value.as_object() else {
            if !value.is_null() {
                warn!("cell blob is not a JSON object; treating as empty");
            }
            return cells;
        };
        for (key, v) in obj {
            let Some(addr) = CellAddress::parse_legacy_key(key) else {
                warn!(key = %key, "skipping unparseable cell key");
                continue;
            };
            match v.as_str() {
                Some(s) => cells.set(&addr, Some(s)),
                None => warn!(key = %key, "skipping non-string cell value"),
            }
        }
        cells
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    pub position: usize,
    pub sheet_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sheet {
    pub id: String,
    pub name: String,
    /// Always sorted by `position`.
    pub columns: Vec<Column>,
    pub cells: CellMap,
}

impl Sheet {
    pub fn new(id: String, name: String, mut columns: Vec<Column>, cells: CellMap) -> Self {
        columns.sort_by_key(|c| c.position);
        Self {
            id,
            name,
            columns,
            cells,
        }
    }

    pub fn set_columns(&mut self, mut columns: Vec<Column>) {
        columns.sort_by_key(|c| c.position);
        self.columns = columns;
    }

    /// Display index of a column (its rank by position).
    pub fn column_index(&self, id: &ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| &c.id == id)
    }

    pub fn column_at(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn value(&self, addr: &CellAddress) -> Option<&str> {
        self.cells.get(addr)
    }
}

/// New dense positions after moving `moved` to `new_position`.
///
/// The other columns keep their relative order and fill `0..n` around the moved
/// one. `new_position` is clamped to the last slot. Returns `None` when `moved`
/// is not in `columns`.
pub fn reindex_columns(
    columns: &[Column],
    moved: &ColumnId,
    new_position: usize,
) -> Option<Vec<(ColumnId, usize)>> {
    if !columns.iter().any(|c| &c.id == moved) {
        return None;
    }
    let target = new_position.min(columns.len() - 1);

    let mut others: Vec<&Column> = columns.iter().filter(|c| &c.id != moved).collect();
    others.sort_by_key(|c| c.position);

    let mut out = Vec::with_capacity(columns.len());
    let mut pos = 0;
    for col in others {
        if pos == target {
            pos += 1;
        }
        out.push((col.id.clone(), pos));
        pos += 1;
    }
    out.push((moved.clone(), target));
    Some(out)
}
