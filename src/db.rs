use std::collections::HashMap;

use crossbeam_channel::{Receiver, Sender};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{
    CellAddress, CellMap, Column, ColumnId, Sheet, SheetSummary, reindex_columns,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sheets (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    organization_id TEXT NOT NULL,
    created_by_id   TEXT NOT NULL,
    cells           TEXT NOT NULL DEFAULT '{}',
    created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
);
CREATE TABLE IF NOT EXISTS columns (
    id              TEXT PRIMARY KEY,
    sheet_id        TEXT NOT NULL REFERENCES sheets(id) ON DELETE CASCADE,
    organization_id TEXT NOT NULL,
    name            TEXT NOT NULL,
    position        INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS columns_by_sheet ON columns(sheet_id, position);
";

/// Who is asking. Every read and write is scoped to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub organization_id: String,
    pub user_id: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sheet {0} not found")]
    NotFound(String),
    #[error("column {0} not found")]
    ColumnNotFound(ColumnId),
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug)]
pub enum DBRequest {
    ListSheets,
    CreateSheet {
        name: String,
    },
    LoadSheet {
        sheet_id: String,
    },
    RenameSheet {
        sheet_id: String,
        name: String,
    },
    /// Rename `column_id`, or append a new column when it is `None`
    UpsertColumn {
        sheet_id: String,
        name: String,
        column_id: Option<ColumnId>,
    },
    MoveColumn {
        sheet_id: String,
        column_id: ColumnId,
        new_position: usize,
    },
    WriteCell {
        sheet_id: String,
        address: CellAddress,
        /// None (or blank) deletes the cell
        value: Option<String>,
        /// Per-cell sequence number; older writes never overwrite newer ones
        seq: u64,
    },
}

impl DBRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            DBRequest::ListSheets => "list-sheets",
            DBRequest::CreateSheet { .. } => "create-sheet",
            DBRequest::LoadSheet { .. } => "load-sheet",
            DBRequest::RenameSheet { .. } => "rename-sheet",
            DBRequest::UpsertColumn { .. } => "upsert-column",
            DBRequest::MoveColumn { .. } => "move-column",
            DBRequest::WriteCell { .. } => "write-cell",
        }
    }
}

#[derive(Debug)]
pub enum DBResponse {
    Sheets {
        sheets: Vec<SheetSummary>,
    },
    SheetCreated {
        sheet: SheetSummary,
    },
    SheetLoaded {
        sheet: Sheet,
    },
    SheetRenamed {
        sheet_id: String,
        name: String,
    },
    ColumnUpserted {
        sheet_id: String,
        column: Column,
    },
    ColumnsMoved {
        sheet_id: String,
        columns: Vec<Column>,
    },
    CellWritten {
        sheet_id: String,
        address: CellAddress,
        seq: u64,
        cells: CellMap,
    },
    WriteSkipped {
        sheet_id: String,
        address: CellAddress,
        seq: u64,
    },
    Error {
        request: &'static str,
        message: String,
        not_found: bool,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied(CellMap),
    /// A write with an equal or newer sequence number already landed.
    Stale,
}

pub fn start_db_worker(
    path: String,
    identity: Identity,
    req_rx: Receiver<DBRequest>,
    resp_tx: Sender<DBResponse>,
) {
    let mut store = match SheetStore::open(&path, identity) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path, error = %e, "failed to open sheet store");
            let _ = resp_tx.send(DBResponse::Error {
                request: "open",
                message: format!("Failed to open DB: {e}"),
                not_found: false,
            });
            return;
        }
    };
    info!(path = %path, "sheet store ready");

    while let Ok(req) = req_rx.recv() {
        let kind = req.kind();
        debug!(request = kind, "store request");
        let resp = store.handle(req).unwrap_or_else(|e| {
            warn!(request = kind, error = %e, "store request failed");
            DBResponse::Error {
                request: kind,
                not_found: matches!(e, StoreError::NotFound(_)),
                message: e.to_string(),
            }
        });
        // Keep draining after the UI hangs up so queued writes still land
        let _ = resp_tx.send(resp);
    }
    debug!("store worker exiting");
}

pub struct SheetStore {
    conn: Connection,
    identity: Identity,
    /// Highest sequence number applied per (sheet, cell)
    applied: HashMap<(String, CellAddress), u64>,
}

impl SheetStore {
    pub fn open(path: &str, identity: Identity) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        Self::with_connection(conn, identity)
    }

    pub fn with_connection(conn: Connection, identity: Identity) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            identity,
            applied: HashMap::new(),
        })
    }

    pub fn handle(&mut self, req: DBRequest) -> StoreResult<DBResponse> {
        match req {
            DBRequest::ListSheets => self.list_sheets().map(|sheets| DBResponse::Sheets { sheets }),
            DBRequest::CreateSheet { name } => self
                .create_sheet(&name)
                .map(|sheet| DBResponse::SheetCreated { sheet }),
            DBRequest::LoadSheet { sheet_id } => self
                .fetch(&sheet_id)
                .map(|sheet| DBResponse::SheetLoaded { sheet }),
            DBRequest::RenameSheet { sheet_id, name } => {
                let name = self.rename_sheet(&sheet_id, &name)?;
                Ok(DBResponse::SheetRenamed { sheet_id, name })
            }
            DBRequest::UpsertColumn {
                sheet_id,
                name,
                column_id,
            } => {
                let column = self.upsert_column(&sheet_id, &name, column_id.as_ref())?;
                Ok(DBResponse::ColumnUpserted { sheet_id, column })
            }
            DBRequest::MoveColumn {
                sheet_id,
                column_id,
                new_position,
            } => {
                let columns = self.move_column(&sheet_id, &column_id, new_position)?;
                Ok(DBResponse::ColumnsMoved { sheet_id, columns })
            }
            DBRequest::WriteCell {
                sheet_id,
                address,
                value,
                seq,
            } => match self.write_cell(&sheet_id, &address, value.as_deref(), seq)? {
                WriteOutcome::Applied(cells) => Ok(DBResponse::CellWritten {
                    sheet_id,
                    address,
                    seq,
                    cells,
                }),
                WriteOutcome::Stale => Ok(DBResponse::WriteSkipped {
                    sheet_id,
                    address,
                    seq,
                }),
            },
        }
    }

    /// Sheets created by this identity, newest first.
    pub fn list_sheets(&self) -> StoreResult<Vec<SheetSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name FROM sheets
             WHERE organization_id = ?1 AND created_by_id = ?2
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let sheets = stmt
            .query_map(
                params![self.identity.organization_id, self.identity.user_id],
                |row| {
                    Ok(SheetSummary {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sheets)
    }

    pub fn create_sheet(&self, name: &str) -> StoreResult<SheetSummary> {
        let sheet = SheetSummary {
            id: Uuid::new_v4().to_string(),
            name: normalize_sheet_name(name),
        };
        self.conn.execute(
            "INSERT INTO sheets (id, name, organization_id, created_by_id) VALUES (?1, ?2, ?3, ?4)",
            params![
                sheet.id,
                sheet.name,
                self.identity.organization_id,
                self.identity.user_id
            ],
        )?;
        debug!(sheet = %sheet.id, "sheet created");
        Ok(sheet)
    }

    /// Full sheet with columns and cells. `NotFound` unless owned by the identity.
    pub fn fetch(&self, sheet_id: &str) -> StoreResult<Sheet> {
        let (name, blob) = owned_sheet(&self.conn, &self.identity, sheet_id)?;
        let columns = load_columns(&self.conn, &self.identity, sheet_id)?;
        let cells = CellMap::from_legacy_json(&serde_json::from_str(&blob)?);
        Ok(Sheet::new(sheet_id.to_string(), name, columns, cells))
    }

    /// Returns the name actually stored.
    pub fn rename_sheet(&self, sheet_id: &str, name: &str) -> StoreResult<String> {
        let name = normalize_sheet_name(name);
        let changed = self.conn.execute(
            "UPDATE sheets SET name = ?1
             WHERE id = ?2 AND organization_id = ?3 AND created_by_id = ?4",
            params![
                name,
                sheet_id,
                self.identity.organization_id,
                self.identity.user_id
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(sheet_id.to_string()));
        }
        Ok(name)
    }

    pub fn upsert_column(
        &mut self,
        sheet_id: &str,
        name: &str,
        column_id: Option<&ColumnId>,
    ) -> StoreResult<Column> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        let org = self.identity.organization_id.clone();
        let tx = self.conn.transaction()?;
        owned_sheet(&tx, &self.identity, sheet_id)?;

        let column = match column_id {
            Some(id) => {
                let changed = tx.execute(
                    "UPDATE columns SET name = ?1
                     WHERE id = ?2 AND sheet_id = ?3 AND organization_id = ?4",
                    params![name, id.as_str(), sheet_id, org],
                )?;
                if changed == 0 {
                    return Err(StoreError::ColumnNotFound(id.clone()));
                }
                load_columns(&tx, &self.identity, sheet_id)?
                    .into_iter()
                    .find(|c| &c.id == id)
                    .ok_or_else(|| StoreError::ColumnNotFound(id.clone()))?
            }
            None => {
                let last: Option<i64> = tx.query_row(
                    "SELECT MAX(position) FROM columns WHERE sheet_id = ?1",
                    params![sheet_id],
                    |row| row.get(0),
                )?;
                let column = Column {
                    id: ColumnId(Uuid::new_v4().to_string()),
                    name: name.to_string(),
                    position: last.map_or(0, |p| p as usize + 1),
                    sheet_id: sheet_id.to_string(),
                };
                tx.execute(
                    "INSERT INTO columns (id, sheet_id, organization_id, name, position)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        column.id.as_str(),
                        sheet_id,
                        org,
                        column.name,
                        column.position as i64
                    ],
                )?;
                column
            }
        };
        tx.commit()?;
        Ok(column)
    }

    /// Reassign dense positions so `column_id` lands at `new_position`.
    /// All updates happen in one transaction.
    pub fn move_column(
        &mut self,
        sheet_id: &str,
        column_id: &ColumnId,
        new_position: usize,
    ) -> StoreResult<Vec<Column>> {
        let tx = self.conn.transaction()?;
        owned_sheet(&tx, &self.identity, sheet_id)?;
        let columns = load_columns(&tx, &self.identity, sheet_id)?;
        let positions = reindex_columns(&columns, column_id, new_position)
            .ok_or_else(|| StoreError::ColumnNotFound(column_id.clone()))?;

        {
            let mut update = tx.prepare("UPDATE columns SET position = ?1 WHERE id = ?2")?;
            for (id, pos) in &positions {
                let current = columns.iter().find(|c| &c.id == id).map(|c| c.position);
                if current != Some(*pos) {
                    update.execute(params![*pos as i64, id.as_str()])?;
                }
            }
        }
        let columns = load_columns(&tx, &self.identity, sheet_id)?;
        tx.commit()?;
        debug!(column = %column_id, position = new_position, "column moved");
        Ok(columns)
    }

    /// Delete on `None`/blank, upsert the trimmed value otherwise.
    pub fn write_cell(
        &mut self,
        sheet_id: &str,
        address: &CellAddress,
        value: Option<&str>,
        seq: u64,
    ) -> StoreResult<WriteOutcome> {
        let key = (sheet_id.to_string(), address.clone());
        if self.applied.get(&key).is_some_and(|&last| last >= seq) {
            debug!(cell = %address.legacy_key(), seq, "stale write skipped");
            return Ok(WriteOutcome::Stale);
        }

        let tx = self.conn.transaction()?;
        let (_, blob) = owned_sheet(&tx, &self.identity, sheet_id)?;
        let mut cells = CellMap::from_legacy_json(&serde_json::from_str(&blob)?);
        cells.set(address, value);
        tx.execute(
            "UPDATE sheets SET cells = ?1 WHERE id = ?2",
            params![cells.to_legacy_json().to_string(), sheet_id],
        )?;
        tx.commit()?;

        self.applied.insert(key, seq);
        Ok(WriteOutcome::Applied(cells))
    }
}

/// Sheet names shorter than three characters fall back to "Untitled".
pub fn normalize_sheet_name(name: &str) -> String {
    let name = name.trim();
    if name.chars().count() < 3 {
        "Untitled".to_string()
    } else {
        name.to_string()
    }
}

fn owned_sheet(conn: &Connection, identity: &Identity, sheet_id: &str) -> StoreResult<(String, String)> {
    conn.query_row(
        "SELECT name, cells FROM sheets
         WHERE id = ?1 AND organization_id = ?2 AND created_by_id = ?3",
        params![sheet_id, identity.organization_id, identity.user_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(sheet_id.to_string()))
}

fn load_columns(conn: &Connection, identity: &Identity, sheet_id: &str) -> StoreResult<Vec<Column>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, position FROM columns
         WHERE sheet_id = ?1 AND organization_id = ?2
         ORDER BY position, rowid",
    )?;
    let columns = stmt
        .query_map(params![sheet_id, identity.organization_id], |row| {
            Ok(Column {
                id: ColumnId(row.get(0)?),
                name: row.get(1)?,
                position: row.get::<_, i64>(2)?.max(0) as usize,
                sheet_id: sheet_id.to_string(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}
