//! Per-client persisted state: the last upload, chart and filter selections,
//! and upload history, each under its own key.
//!
//! Keys load independently. A key that fails to decode is logged, cleared
//! and treated as absent; it never stops its siblings from loading.

use std::collections::HashMap;
use std::path::Path;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use crate::error::AppError;
use crate::models::{dataset_name_for, Dataset, Row};
use crate::services::selection::{ChartType, SelectionPatch};

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    fn set(&self, key: &str, value: &str) -> Result<(), AppError>;
    fn remove(&self, key: &str) -> Result<(), AppError>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AppError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS client_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM client_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.conn.lock().execute(
            "INSERT INTO client_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        self.conn
            .lock()
            .execute("DELETE FROM client_state WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKey {
    UploadedData,
    ChartSettings,
    Filters,
    UploadHistory,
}

impl StateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::UploadedData => "uploadedData",
            StateKey::ChartSettings => "chartSettings",
            StateKey::Filters => "filters",
            StateKey::UploadHistory => "uploadHistory",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDataset {
    #[serde(default)]
    pub data: Vec<Row>,
    pub file_name: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl StoredDataset {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        Self {
            data: dataset.rows.clone(),
            file_name: dataset.file_name.clone(),
            uploaded_at: dataset.uploaded_at,
        }
    }

    pub fn into_dataset(self) -> Dataset {
        Dataset {
            name: dataset_name_for(self.file_name.as_deref(), "Uploaded Dataset"),
            file_name: self.file_name,
            uploaded_at: self.uploaded_at,
            rows: self.data,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSettings {
    pub chart_type: Option<ChartType>,
    pub x_field: Option<String>,
    pub y_fields: Option<Vec<String>>,
}

impl ChartSettings {
    pub fn into_patch(self) -> SelectionPatch {
        SelectionPatch {
            chart_type: self.chart_type,
            x_field: self.x_field.filter(|x| !x.is_empty()),
            y_fields: self.y_fields,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSettings {
    pub filter_field: String,
    pub filter_value: String,
}

/// One client's view of a [`KeyValueStore`], every key prefixed by its namespace.
pub struct ClientState<'a> {
    store: &'a dyn KeyValueStore,
    namespace: String,
}

impl<'a> ClientState<'a> {
    pub fn new(store: &'a dyn KeyValueStore, namespace: &str) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
        }
    }

    fn full_key(&self, key: StateKey) -> String {
        format!("{}:{}", self.namespace, key.as_str())
    }

    pub fn read<T: DeserializeOwned>(&self, key: StateKey) -> Result<Option<T>, AppError> {
        let full_key = self.full_key(key);
        match self.store.get(&full_key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| AppError::StorageCorruption {
                    key: full_key,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Read a key, resetting it when it is unreadable.
    pub fn load<T: DeserializeOwned>(&self, key: StateKey) -> Option<T> {
        match self.read(key) {
            Ok(value) => value,
            Err(err @ AppError::StorageCorruption { .. }) => {
                tracing::warn!("{}; resetting to default", err);
                if let Err(e) = self.store.remove(&self.full_key(key)) {
                    tracing::warn!("Failed to clear corrupt key {}: {}", key.as_str(), e);
                }
                None
            }
            Err(err) => {
                tracing::warn!("Failed to load {}: {}", key.as_str(), err);
                None
            }
        }
    }

    pub fn save<T: Serialize>(&self, key: StateKey, value: &T) -> Result<(), AppError> {
        let raw = serde_json::to_string(value)?;
        self.store.set(&self.full_key(key), &raw)
    }

    pub fn clear(&self, key: StateKey) -> Result<(), AppError> {
        self.store.remove(&self.full_key(key))
    }
}
