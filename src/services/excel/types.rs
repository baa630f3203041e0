use chrono::{DateTime, Utc};
use serde::Serialize;
use smallvec::SmallVec;
use crate::models::CellValue;

pub const SAMPLE_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Text,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Text => "text",
        }
    }
}

/// Ordered columns of a dataset and the subset classified numeric.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub columns: Vec<String>,
    pub numeric_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumericSummary {
    pub min: f64,
    pub max: f64,
    pub mean: String,
    pub median: String,
    pub std_dev: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInsight {
    pub column: String,
    #[serde(rename = "type")]
    pub kind: ColumnKind,
    pub unique_count: usize,
    pub sample_values: SmallVec<[CellValue; SAMPLE_SIZE]>,
    #[serde(flatten)]
    pub numeric: Option<NumericSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicInsights {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<String>,
    pub file_name: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
}
