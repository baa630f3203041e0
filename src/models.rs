use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single spreadsheet cell.
///
/// `Null` and an absent key are both "missing"; neither is ever read as zero
/// or as an empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", b),
            CellValue::Number(n) => write_number(f, *n),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

/// Plain decimal notation in `[1e-6, 1e21)`, exponent notation (`1e+21`,
/// `1.5e-7`) outside it, the way spreadsheet front ends print numbers.
fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    let magnitude = n.abs();
    if n == 0.0 || !n.is_finite() || (1e-6..1e21).contains(&magnitude) {
        return write!(f, "{}", n);
    }
    let exp = format!("{:e}", n);
    match exp.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            write!(f, "{}e+{}", mantissa, exponent)
        }
        _ => f.write_str(&exp),
    }
}

/// One parsed spreadsheet row, column name to value.
pub type Row = IndexMap<String, CellValue>;

pub const SAMPLE_DATASET_NAME: &str = "Sample Dataset";

static EXCEL_EXTENSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(xlsx|xls)$").expect("static regex"));

/// Display name for an uploaded file: the file name without its Excel extension.
pub fn dataset_name_for(file_name: Option<&str>, fallback: &str) -> String {
    match file_name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => EXCEL_EXTENSION.replace(name, "").into_owned(),
        None => fallback.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMeta {
    pub name: String,
    pub file_name: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub row_count: usize,
}

/// The rows a workspace is currently looking at. Never mutated after load;
/// a new upload replaces the whole value.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub name: String,
    pub file_name: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub rows: Vec<Row>,
}

impl Dataset {
    pub fn uploaded(file_name: &str, rows: Vec<Row>) -> Self {
        Self {
            name: dataset_name_for(Some(file_name), "Uploaded Dataset"),
            file_name: Some(file_name.to_string()),
            uploaded_at: Some(Utc::now()),
            rows,
        }
    }

    /// The bundled dataset shown before anything has been uploaded.
    pub fn sample() -> Self {
        let rows = [
            ("Q1", 120.0, 32.0, "East"),
            ("Q2", 180.0, 54.0, "West"),
            ("Q3", 140.0, 43.0, "North"),
            ("Q4", 210.0, 76.0, "South"),
        ]
        .into_iter()
        .map(|(quarter, sales, profit, region)| {
            let mut row = Row::new();
            row.insert("Quarter".to_string(), CellValue::from(quarter));
            row.insert("Sales".to_string(), CellValue::from(sales));
            row.insert("Profit".to_string(), CellValue::from(profit));
            row.insert("Region".to_string(), CellValue::from(region));
            row
        })
        .collect();

        Self {
            name: SAMPLE_DATASET_NAME.to_string(),
            file_name: None,
            uploaded_at: None,
            rows,
        }
    }

    pub fn is_sample(&self) -> bool {
        self.file_name.is_none() && self.name == SAMPLE_DATASET_NAME
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn meta(&self) -> DatasetMeta {
        DatasetMeta {
            name: self.name.clone(),
            file_name: self.file_name.clone(),
            uploaded_at: self.uploaded_at,
            row_count: self.row_count(),
        }
    }
}

/// The caller identity every dataset query is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal(pub String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
