use indexmap::IndexSet;
use crate::models::{CellValue, Row};
use super::types::{ColumnKind, Schema};
use super::utils::to_number;

/// Classify a column from its values.
///
/// Numeric only when there is at least one non-missing value and every
/// non-missing value reads as a number.
pub fn classify<'a, I>(values: I) -> ColumnKind
where
    I: IntoIterator<Item = &'a CellValue>,
{
    let mut seen_any = false;
    for value in values.into_iter().filter(|v| !v.is_missing()) {
        if to_number(value).is_none() {
            return ColumnKind::Text;
        }
        seen_any = true;
    }

    if seen_any {
        ColumnKind::Numeric
    } else {
        ColumnKind::Text
    }
}

/// Values of `column` across `rows`, with absent keys skipped.
pub fn column_values<'a>(rows: &'a [Row], column: &'a str) -> impl Iterator<Item = &'a CellValue> + 'a {
    rows.iter().filter_map(move |row| row.get(column))
}

pub fn infer_schema(rows: &[Row]) -> Schema {
    let columns: IndexSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();

    let numeric_columns = columns
        .iter()
        .filter(|column| classify(column_values(rows, column)) == ColumnKind::Numeric)
        .map(|column| column.to_string())
        .collect();

    let schema = Schema {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        numeric_columns,
    };
    tracing::debug!(
        "Inferred {} columns ({} numeric) from {} rows",
        schema.columns.len(),
        schema.numeric_columns.len(),
        rows.len()
    );
    schema
}
