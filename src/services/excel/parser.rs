use std::collections::HashSet;
use std::io::Cursor;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use crate::error::AppError;
use crate::models::{CellValue, Row};
use super::utils::{excel_serial_to_text, unique_header};

pub const EXCEL_CONTENT_TYPES: [&str; 2] = [
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-excel",
];

const EXCEL_EXTENSIONS: [&str; 2] = ["xlsx", "xls"];

/// Reject an upload before it reaches the parser.
pub fn validate_upload(
    file_name: &str,
    content_type: Option<&str>,
    size: usize,
    max_size: usize,
) -> Result<(), AppError> {
    if size > max_size {
        tracing::warn!("Rejecting {}: {} bytes over the {} byte limit", file_name, size, max_size);
        return Err(AppError::FileTooLarge { size, limit: max_size });
    }

    let declared = content_type
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");

    let accepted = match declared {
        Some(ct) => EXCEL_CONTENT_TYPES.contains(&ct.as_str()),
        None => file_name
            .rsplit_once('.')
            .map(|(_, ext)| EXCEL_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false),
    };

    if !accepted {
        tracing::warn!("Rejecting {}: unsupported type {:?}", file_name, content_type);
        return Err(AppError::UnsupportedFileType(
            content_type.unwrap_or(file_name).to_string(),
        ));
    }
    Ok(())
}

pub struct ExcelParser;

impl ExcelParser {
    /// Rows of the first sheet, keyed by the header row.
    ///
    /// Every row carries every header; empty cells are `CellValue::Null`.
    pub fn parse_bytes(&self, file_data: &[u8]) -> Result<Vec<Row>, AppError> {
        let start = std::time::Instant::now();
        tracing::info!("Parsing workbook ({}KB)", file_data.len() / 1024);

        let mut workbook = open_workbook_auto_from_rs(Cursor::new(file_data))
            .map_err(|e| {
                tracing::error!("Failed to open workbook: {}", e);
                AppError::ParseError(format!("Failed to open Excel file: {}", e))
            })?;

        let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
        tracing::debug!("Found {} sheets: {:?}", sheet_names.len(), sheet_names);

        let first_sheet = sheet_names
            .first()
            .ok_or_else(|| AppError::ParseError("No sheets found in workbook".to_string()))?;

        let range = workbook.worksheet_range(first_sheet).map_err(|e| {
            tracing::error!("Failed to read worksheet {}: {}", first_sheet, e);
            AppError::ParseError(format!("Failed to read worksheet {}: {}", first_sheet, e))
        })?;

        let mut sheet_rows = range.rows();
        let headers = match sheet_rows.next() {
            Some(header_row) => {
                let mut existing_names = HashSet::new();
                header_row
                    .iter()
                    .map(|cell| unique_header(&header_text(cell), &mut existing_names))
                    .collect::<Vec<_>>()
            }
            None => {
                tracing::warn!("Sheet {} is empty", first_sheet);
                return Ok(Vec::new());
            }
        };

        let rows: Vec<Row> = sheet_rows
            .map(|cells| cells.iter().map(cell_value).collect::<Vec<_>>())
            .filter(|values| values.iter().any(|v| !v.is_missing()))
            .map(|values| {
                headers
                    .iter()
                    .enumerate()
                    .map(|(idx, header)| {
                        let value = values.get(idx).cloned().unwrap_or(CellValue::Null);
                        (header.clone(), value)
                    })
                    .collect()
            })
            .collect();

        tracing::info!(
            "Parsed sheet {} into {} rows x {} columns in {:?}",
            first_sheet,
            rows.len(),
            headers.len(),
            start.elapsed()
        );
        Ok(rows)
    }
}

fn header_text(cell: &Data) -> String {
    match cell_value(cell) {
        CellValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Null,
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::String(s) if s.trim().is_empty() => CellValue::Null,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::DateTime(d) => excel_serial_to_text(d.as_f64())
            .map(CellValue::Text)
            .unwrap_or(CellValue::Number(d.as_f64())),
        other => CellValue::Text(other.to_string()),
    }
}
