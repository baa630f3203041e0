use std::borrow::Cow;
use std::collections::BTreeSet;
use crate::models::Row;
use crate::services::excel::utils::to_text;

/// Keep rows whose `field` renders exactly as `value`.
///
/// An empty field or an empty value means no filter, and the input comes back
/// borrowed. Missing values never match: a missing cell has no text form, so
/// filtering on the literal `"null"` only matches cells that contain it.
pub fn apply_filter<'a>(rows: &'a [Row], field: &str, value: &str) -> Cow<'a, [Row]> {
    if field.is_empty() || value.is_empty() {
        return Cow::Borrowed(rows);
    }

    let kept: Vec<Row> = rows
        .iter()
        .filter(|row| {
            row.get(field)
                .and_then(to_text)
                .map_or(false, |text| text == value)
        })
        .cloned()
        .collect();

    tracing::debug!("Filter {}={:?} kept {}/{} rows", field, value, kept.len(), rows.len());
    Cow::Owned(kept)
}

/// Distinct non-blank values of `field`, sorted, for building a filter picker.
pub fn filter_values(rows: &[Row], field: &str) -> Vec<String> {
    if field.is_empty() {
        return Vec::new();
    }
    rows.iter()
        .filter_map(|row| row.get(field).and_then(to_text))
        .filter(|text| !text.trim().is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
