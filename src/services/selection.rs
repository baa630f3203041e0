//! Chart and filter selections, kept valid against the current columns.
//!
//! Every command takes the current state by reference and returns the next
//! one, so callers decide when to store it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_Y_FIELDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChartType {
    #[default]
    #[serde(rename = "line")]
    Line,
    #[serde(rename = "area")]
    Area,
    #[serde(rename = "bar")]
    Bar,
    #[serde(rename = "scatter")]
    Scatter,
    #[serde(rename = "pie")]
    Pie,
    #[serde(rename = "bar3D")]
    Bar3D,
    #[serde(rename = "scatter3D")]
    Scatter3D,
}

impl ChartType {
    pub const ALL: [ChartType; 7] = [
        ChartType::Line,
        ChartType::Area,
        ChartType::Bar,
        ChartType::Scatter,
        ChartType::Pie,
        ChartType::Bar3D,
        ChartType::Scatter3D,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Line => "line",
            ChartType::Area => "area",
            ChartType::Bar => "bar",
            ChartType::Scatter => "scatter",
            ChartType::Pie => "pie",
            ChartType::Bar3D => "bar3D",
            ChartType::Scatter3D => "scatter3D",
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChartType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown chart type '{}'", s))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionState {
    pub chart_type: ChartType,
    pub x_field: String,
    pub y_fields: Vec<String>,
    pub filter_field: String,
    pub filter_value: String,
}

/// Partial update of the chart part of a selection. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectionPatch {
    pub chart_type: Option<ChartType>,
    pub x_field: Option<String>,
    pub y_fields: Option<Vec<String>>,
}

impl SelectionState {
    pub fn apply(&self, patch: SelectionPatch) -> SelectionState {
        let mut next = self.clone();
        if let Some(chart_type) = patch.chart_type {
            next.chart_type = chart_type;
        }
        if let Some(x_field) = patch.x_field {
            next.x_field = x_field;
        }
        if let Some(y_fields) = patch.y_fields {
            let mut kept: Vec<String> = Vec::with_capacity(MAX_Y_FIELDS);
            for field in y_fields {
                if kept.len() == MAX_Y_FIELDS {
                    break;
                }
                if !field.is_empty() && !kept.contains(&field) {
                    kept.push(field);
                }
            }
            next.y_fields = kept;
        }
        next
    }

    pub fn with_filter(&self, field: &str, value: &str) -> SelectionState {
        SelectionState {
            filter_field: field.to_string(),
            filter_value: value.to_string(),
            ..self.clone()
        }
    }

    /// Drop axis fields that are not in `columns`.
    ///
    /// The filter field is left as is; see [`SelectionState::filter_is_stale`].
    pub fn repair(&self, columns: &[String]) -> SelectionState {
        let has = |name: &str| columns.iter().any(|c| c == name);

        let x_field = if has(self.x_field.as_str()) {
            self.x_field.clone()
        } else {
            columns.first().cloned().unwrap_or_default()
        };

        let y_fields: Vec<String> = self
            .y_fields
            .iter()
            .filter(|y| has(y.as_str()))
            .take(MAX_Y_FIELDS)
            .cloned()
            .collect();

        if x_field != self.x_field || y_fields != self.y_fields {
            tracing::debug!(
                "Repaired selection: x {:?} -> {:?}, y {:?} -> {:?}",
                self.x_field,
                x_field,
                self.y_fields,
                y_fields
            );
        }

        SelectionState {
            x_field,
            y_fields,
            ..self.clone()
        }
    }

    pub fn filter_is_stale(&self, columns: &[String]) -> bool {
        !self.filter_field.is_empty() && !columns.iter().any(|c| *c == self.filter_field)
    }
}
