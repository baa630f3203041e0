use std::path::Path;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};
use crate::error::AppError;
use crate::models::{dataset_name_for, Dataset, Principal, Row};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFileSummary {
    pub id: i64,
    pub file_name: String,
    pub row_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Uploaded datasets, always scoped to the principal that uploaded them.
pub trait DatasetStore: Send + Sync {
    /// Most recent upload, or `AppError::NotFound`.
    fn latest(&self, principal: &Principal) -> Result<Dataset, AppError>;
    fn save(&self, principal: &Principal, dataset: &Dataset) -> Result<i64, AppError>;
    fn list(&self, principal: &Principal) -> Result<Vec<StoredFileSummary>, AppError>;
    fn get(&self, principal: &Principal, id: i64) -> Result<Dataset, AppError>;
    /// Drop a stored upload. Removing an unknown id is not an error.
    fn remove(&self, principal: &Principal, id: i64) -> Result<(), AppError>;
}

pub struct SqliteDatasetStore {
    conn: Mutex<Connection>,
}

impl SqliteDatasetStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        info!("Opening dataset store at {}", path.display());
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        debug!("Opening in-memory dataset store");
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AppError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS spreadsheets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                principal TEXT NOT NULL,
                file_name TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                rows_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_spreadsheets_principal ON spreadsheets (principal, id)",
            [],
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn load_one(&self, sql: &str, principal: &Principal, id: Option<i64>) -> Result<Dataset, AppError> {
        let conn = self.conn.lock();
        let found: Option<(String, String, String)> = match id {
            Some(id) => conn.query_row(sql, params![principal.as_str(), id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            }),
            None => conn.query_row(sql, params![principal.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            }),
        }
        .optional()?;

        let (file_name, rows_json, created_at) = found.ok_or_else(|| {
            AppError::NotFound(format!("No stored dataset for {}", principal))
        })?;
        let rows: Vec<Row> = serde_json::from_str(&rows_json)?;

        Ok(Dataset {
            name: dataset_name_for(Some(&file_name), "Latest Dataset"),
            file_name: Some(file_name),
            uploaded_at: parse_timestamp(&created_at),
            rows,
        })
    }
}

impl DatasetStore for SqliteDatasetStore {
    fn latest(&self, principal: &Principal) -> Result<Dataset, AppError> {
        self.load_one(
            "SELECT file_name, rows_json, created_at FROM spreadsheets
             WHERE principal = ?1 ORDER BY id DESC LIMIT 1",
            principal,
            None,
        )
    }

    fn save(&self, principal: &Principal, dataset: &Dataset) -> Result<i64, AppError> {
        let rows_json = serde_json::to_string(&dataset.rows)?;
        let created_at = dataset.uploaded_at.unwrap_or_else(Utc::now);
        let file_name = dataset.file_name.clone().unwrap_or_else(|| dataset.name.clone());

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO spreadsheets (principal, file_name, row_count, rows_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                principal.as_str(),
                file_name,
                dataset.row_count() as i64,
                rows_json,
                created_at.to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!("Stored {} ({} rows) for {} as #{}", file_name, dataset.row_count(), principal, id);
        Ok(id)
    }

    fn list(&self, principal: &Principal) -> Result<Vec<StoredFileSummary>, AppError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, file_name, row_count, created_at FROM spreadsheets
             WHERE principal = ?1 ORDER BY id DESC",
        )?;
        let summaries = stmt
            .query_map(params![principal.as_str()], |row| {
                let created_at: String = row.get(3)?;
                Ok(StoredFileSummary {
                    id: row.get(0)?,
                    file_name: row.get(1)?,
                    row_count: row.get::<_, i64>(2)? as usize,
                    created_at: parse_timestamp(&created_at).unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    fn get(&self, principal: &Principal, id: i64) -> Result<Dataset, AppError> {
        self.load_one(
            "SELECT file_name, rows_json, created_at FROM spreadsheets
             WHERE principal = ?1 AND id = ?2",
            principal,
            Some(id),
        )
    }

    fn remove(&self, principal: &Principal, id: i64) -> Result<(), AppError> {
        let removed = self.conn.lock().execute(
            "DELETE FROM spreadsheets WHERE principal = ?1 AND id = ?2",
            params![principal.as_str(), id],
        )?;
        debug!("Removed {} stored dataset(s) #{} for {}", removed, id, principal);
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
