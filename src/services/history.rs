use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub file_name: String,
    pub rows: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Recent uploads, newest first, never longer than [`HISTORY_LIMIT`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadHistory {
    entries: Vec<HistoryEntry>,
}

impl UploadHistory {
    pub fn from_entries(mut entries: Vec<HistoryEntry>) -> Self {
        entries.truncate(HISTORY_LIMIT);
        Self { entries }
    }

    pub fn record(&mut self, file_name: &str, rows: usize) {
        self.entries.insert(
            0,
            HistoryEntry {
                file_name: file_name.to_string(),
                rows,
                uploaded_at: Some(Utc::now()),
            },
        );
        self.entries.truncate(HISTORY_LIMIT);
    }

    pub fn remove(&mut self, index: usize) -> Option<HistoryEntry> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
