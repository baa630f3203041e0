//! Value coercion shared by schema inference, insights, filtering and charting.
//!
//! Every "is this a number" or "what does this look like as text" question in
//! the crate goes through this module so the components cannot disagree about
//! `"1"` versus `1`.

use std::collections::HashSet;
use chrono::{Duration, NaiveDate};
use crate::models::CellValue;

/// Numeric reading of a cell. Finite numbers and text whose trimmed form
/// parses as a finite `f64`; booleans, blanks and missing values are not numbers.
pub fn to_number(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Number(n) if n.is_finite() => Some(*n),
        CellValue::Text(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
        }
        _ => None,
    }
}

/// Text reading of a cell, `None` when the value is missing.
///
/// Numbers render through `CellValue`'s `Display`: shortest round-trip
/// decimals, with exponent notation at or above `1e21` and below `1e-6`.
pub fn to_text(value: &CellValue) -> Option<String> {
    match value {
        CellValue::Null => None,
        other => Some(other.to_string()),
    }
}

/// Format to two decimals, rounding half away from zero on the value scaled by 100.
pub fn fixed2(value: f64) -> String {
    let scaled = value * 100.0;
    if !scaled.is_finite() {
        // past 1e306 there are no fractional digits left to round
        return format!("{:.2}", value);
    }
    let rounded = scaled.round() / 100.0;
    // avoid printing "-0.00"
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{:.2}", rounded)
}

/// Header name for a column, unique within `existing_names`.
///
/// Blank headers become `__EMPTY`; repeats get `_1`, `_2`, ... suffixes.
pub fn unique_header(name: &str, existing_names: &mut HashSet<String>) -> String {
    let trimmed = name.trim();
    let base_name = if trimmed.is_empty() { "__EMPTY" } else { trimmed };

    let mut cleaned = base_name.to_string();
    let mut counter = 1;
    while !existing_names.insert(cleaned.clone()) {
        cleaned = format!("{}_{}", base_name, counter);
        counter += 1;
    }

    cleaned
}

/// Render an Excel serial date (1900 date system) as `YYYY-MM-DD[ HH:MM:SS]`.
pub fn excel_serial_to_text(serial: f64) -> Option<String> {
    // 2958465 is 9999-12-31, the last date Excel can represent
    if !serial.is_finite() || !(0.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    let datetime = epoch.checked_add_signed(Duration::milliseconds(millis))?;

    if serial.fract() == 0.0 {
        Some(datetime.format("%Y-%m-%d").to_string())
    } else {
        Some(datetime.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}
