//! Chart-type specific series built from filtered rows and a selection.

use indexmap::IndexMap;
use serde::Serialize;
use crate::models::{CellValue, Row};
use crate::services::excel::utils::{to_number, to_text};
use crate::services::selection::{ChartType, SelectionState};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub x: CellValue,
    pub y: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PieSlice {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChartSeries {
    /// line, area and bar: one category per row, one series per y field.
    #[serde(rename_all = "camelCase")]
    Cartesian {
        chart_type: ChartType,
        x_field: String,
        categories: Vec<CellValue>,
        series: Vec<Series>,
    },
    #[serde(rename_all = "camelCase")]
    Scatter {
        x_field: String,
        y_field: String,
        points: Vec<ScatterPoint>,
    },
    /// One slice per row. Duplicate names are not merged.
    Pie { slices: Vec<PieSlice> },
    /// bar3D and scatter3D: `(x index, y index, value)` over two category axes.
    #[serde(rename_all = "camelCase")]
    Grid3D {
        chart_type: ChartType,
        x_labels: Vec<CellValue>,
        y_labels: Vec<CellValue>,
        points: Vec<(usize, usize, f64)>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "chart", rename_all = "snake_case")]
pub enum ChartOutcome {
    NoData,
    IncompleteSelection,
    Ready(ChartSeries),
}

pub fn build_chart(rows: &[Row], selection: &SelectionState) -> ChartOutcome {
    if rows.is_empty() {
        return ChartOutcome::NoData;
    }
    let x_field = selection.x_field.as_str();
    let Some(first_y) = selection.y_fields.first() else {
        return ChartOutcome::IncompleteSelection;
    };
    if x_field.is_empty() {
        return ChartOutcome::IncompleteSelection;
    }

    let series = match selection.chart_type {
        ChartType::Line | ChartType::Area | ChartType::Bar => ChartSeries::Cartesian {
            chart_type: selection.chart_type,
            x_field: x_field.to_string(),
            categories: rows.iter().map(|row| cell(row, x_field)).collect(),
            series: selection
                .y_fields
                .iter()
                .map(|y| Series {
                    name: y.clone(),
                    values: rows.iter().map(|row| number(row, y)).collect(),
                })
                .collect(),
        },
        ChartType::Scatter => ChartSeries::Scatter {
            x_field: x_field.to_string(),
            y_field: first_y.clone(),
            points: rows
                .iter()
                .map(|row| ScatterPoint {
                    x: cell(row, x_field),
                    y: number(row, first_y),
                })
                .collect(),
        },
        ChartType::Pie => ChartSeries::Pie {
            slices: rows
                .iter()
                .map(|row| PieSlice {
                    name: row.get(x_field).and_then(to_text).unwrap_or_default(),
                    value: number(row, first_y).unwrap_or(0.0),
                })
                .collect(),
        },
        ChartType::Bar3D | ChartType::Scatter3D => {
            let value_field = selection.y_fields.get(1);
            let mut x_axis = CategoryAxis::default();
            let mut y_axis = CategoryAxis::default();
            let points = rows
                .iter()
                .map(|row| {
                    let x = x_axis.index_of(cell(row, x_field));
                    let y = y_axis.index_of(cell(row, first_y));
                    let value = value_field.and_then(|f| number(row, f)).unwrap_or(0.0);
                    (x, y, value)
                })
                .collect();
            ChartSeries::Grid3D {
                chart_type: selection.chart_type,
                x_labels: x_axis.into_labels(),
                y_labels: y_axis.into_labels(),
                points,
            }
        }
    };

    ChartOutcome::Ready(series)
}

fn cell(row: &Row, field: &str) -> CellValue {
    row.get(field).cloned().unwrap_or(CellValue::Null)
}

fn number(row: &Row, field: &str) -> Option<f64> {
    row.get(field).and_then(to_number)
}

/// Distinct labels in first-seen order. Missing values share one label.
#[derive(Default)]
struct CategoryAxis {
    labels: IndexMap<Option<String>, CellValue>,
}

impl CategoryAxis {
    fn index_of(&mut self, value: CellValue) -> usize {
        let entry = self.labels.entry(to_text(&value));
        let index = entry.index();
        entry.or_insert(value);
        index
    }

    fn into_labels(self) -> Vec<CellValue> {
        self.labels.into_values().collect()
    }
}
