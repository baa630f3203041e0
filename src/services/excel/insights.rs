use std::collections::HashSet;
use indexmap::IndexMap;
use smallvec::SmallVec;
use crate::models::{CellValue, DatasetMeta, Row};
use super::schema::{classify, column_values};
use super::types::{BasicInsights, ColumnInsight, ColumnKind, NumericSummary, SAMPLE_SIZE};
use super::utils::{fixed2, to_number, to_text};

const LARGE_MAGNITUDE: f64 = 1e150;

pub fn basic_insights(meta: &DatasetMeta, rows: &[Row], columns: &[String]) -> BasicInsights {
    BasicInsights {
        row_count: rows.len(),
        column_count: columns.len(),
        columns: columns.to_vec(),
        file_name: meta.file_name.clone(),
        uploaded_at: meta.uploaded_at,
    }
}

pub fn column_insights(rows: &[Row], columns: &[String]) -> Vec<ColumnInsight> {
    if rows.is_empty() {
        return Vec::new();
    }
    columns
        .iter()
        .map(|name| analyze_column(name, column_values(rows, name)))
        .collect()
}

pub fn analyze_column<'a, I>(name: &str, values: I) -> ColumnInsight
where
    I: IntoIterator<Item = &'a CellValue>,
{
    let mut sample_values = SmallVec::<[CellValue; SAMPLE_SIZE]>::new();
    let mut seen = HashSet::new();
    let mut present: Vec<&CellValue> = Vec::new();

    for value in values.into_iter().filter(|v| !v.is_missing()) {
        if sample_values.len() < SAMPLE_SIZE {
            sample_values.push(value.clone());
        }
        if let Some(text) = to_text(value) {
            seen.insert(text);
        }
        present.push(value);
    }

    let kind = classify(present.iter().copied());
    let (numeric, top_value) = match kind {
        ColumnKind::Numeric => (numeric_summary(&present), None),
        ColumnKind::Text => (None, top_value(&present)),
    };

    ColumnInsight {
        column: name.to_string(),
        kind,
        unique_count: seen.len(),
        sample_values,
        numeric,
        top_value,
    }
}

fn numeric_summary(values: &[&CellValue]) -> Option<NumericSummary> {
    let mut nums: Vec<f64> = values.iter().filter_map(|v| to_number(v)).collect();
    if nums.is_empty() {
        return None;
    }
    nums.sort_by(|a, b| a.total_cmp(b));

    let n = nums.len();
    let (min, max) = (nums[0], nums[n - 1]);
    let median = if n % 2 == 0 {
        nums[n / 2 - 1] / 2.0 + nums[n / 2] / 2.0
    } else {
        nums[n / 2]
    };

    // sums of values near f64::MAX overflow; work on values scaled into [-1, 1]
    let magnitude = min.abs().max(max.abs());
    let scale = if magnitude > LARGE_MAGNITUDE { magnitude } else { 1.0 };
    let scaled_mean = nums.iter().map(|v| v / scale).sum::<f64>() / n as f64;
    let scaled_variance = nums
        .iter()
        .map(|v| (v / scale - scaled_mean).powi(2))
        .sum::<f64>()
        / n as f64;

    Some(NumericSummary {
        min,
        max,
        mean: fixed2((scaled_mean * scale).clamp(min, max)),
        median: fixed2(median),
        std_dev: fixed2(scaled_variance.sqrt() * scale),
    })
}

// ties go to the key inserted first
fn top_value(values: &[&CellValue]) -> Option<String> {
    let mut freq: IndexMap<String, usize> = IndexMap::new();
    for text in values.iter().filter_map(|v| to_text(v)) {
        *freq.entry(text).or_insert(0) += 1;
    }

    let mut best: Option<(&String, usize)> = None;
    for (key, &count) in &freq {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((key, count)),
        }
    }
    best.map(|(key, _)| key.clone())
}
