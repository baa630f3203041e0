use std::sync::Arc;
use serde::Serialize;
use crate::error::AppError;
use crate::models::{Dataset, DatasetMeta, Principal, Row};
use crate::services::chart::{build_chart, ChartOutcome};
use crate::services::dataset_store::DatasetStore;
use crate::services::excel::insights::{basic_insights, column_insights};
use crate::services::excel::{infer_schema, BasicInsights, ColumnInsight, Schema};
use crate::services::filter::{apply_filter, filter_values};
use crate::services::history::{HistoryEntry, UploadHistory};
use crate::services::report::InsightReport;
use crate::services::selection::{SelectionPatch, SelectionState};
use crate::services::state_store::{ChartSettings, ClientState, FilterSettings, StateKey, StoredDataset};

const PREVIEW_ROWS: usize = 5;

/// Everything a dashboard view needs, computed from the current dataset and selection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub dataset: DatasetMeta,
    pub preview: Vec<Row>,
    pub columns: Vec<String>,
    pub numeric_columns: Vec<String>,
    pub filtered_rows: Vec<Row>,
    pub basic_insights: BasicInsights,
    pub column_insights: Vec<ColumnInsight>,
    pub selection: SelectionState,
    pub filter_field_stale: bool,
    pub chart: ChartOutcome,
}

/// One viewer's dataset, selections and upload history.
#[derive(Debug, Clone)]
pub struct Workspace {
    dataset: Arc<Dataset>,
    schema: Schema,
    selection: SelectionState,
    history: UploadHistory,
}

impl Workspace {
    pub fn new(dataset: Dataset) -> Self {
        Self::from_parts(dataset, SelectionState::default(), UploadHistory::default())
    }

    pub fn from_parts(dataset: Dataset, selection: SelectionState, history: UploadHistory) -> Self {
        let schema = infer_schema(&dataset.rows);
        let selection = selection.repair(&schema.columns);
        Self {
            dataset: Arc::new(dataset),
            schema,
            selection,
            history,
        }
    }

    /// Rebuild a workspace from persisted client state.
    ///
    /// Falls back to the principal's latest stored dataset, then to the bundled sample.
    pub fn restore(state: &ClientState<'_>, datasets: &dyn DatasetStore, principal: &Principal) -> Self {
        let history = state
            .load::<Vec<HistoryEntry>>(StateKey::UploadHistory)
            .map(UploadHistory::from_entries)
            .unwrap_or_default();

        let dataset = match state.load::<StoredDataset>(StateKey::UploadedData) {
            Some(stored) => stored.into_dataset(),
            None => match datasets.latest(principal) {
                Ok(dataset) => dataset,
                Err(AppError::NotFound(_)) => {
                    tracing::info!("No dataset stored for {} yet, using sample", principal);
                    Dataset::sample()
                }
                Err(e) => {
                    tracing::warn!("Failed to load latest dataset for {}: {}", principal, e);
                    Dataset::sample()
                }
            },
        };

        let mut selection = SelectionState::default();
        if let Some(chart) = state.load::<ChartSettings>(StateKey::ChartSettings) {
            selection = selection.apply(chart.into_patch());
        }
        if let Some(filters) = state.load::<FilterSettings>(StateKey::Filters) {
            selection = selection.with_filter(&filters.filter_field, &filters.filter_value);
        }

        Self::from_parts(dataset, selection, history)
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn history(&self) -> &UploadHistory {
        &self.history
    }

    pub fn set_selection(&mut self, patch: SelectionPatch) -> &SelectionState {
        self.selection = self.selection.apply(patch).repair(&self.schema.columns);
        &self.selection
    }

    pub fn set_filter(&mut self, field: &str, value: &str) -> &SelectionState {
        self.selection = self.selection.with_filter(field, value);
        &self.selection
    }

    /// Swap in a new dataset and bring the selection in line with its columns.
    pub fn replace_dataset(&mut self, dataset: Dataset) {
        let schema = infer_schema(&dataset.rows);
        self.selection = self.selection.repair(&schema.columns);
        self.schema = schema;
        self.dataset = Arc::new(dataset);
    }

    /// Record a successful upload and make it the active dataset.
    pub fn accept_upload(&mut self, dataset: Dataset) {
        let file_name = dataset
            .file_name
            .clone()
            .unwrap_or_else(|| dataset.name.clone());
        self.history.record(&file_name, dataset.row_count());
        self.replace_dataset(dataset);
    }

    pub fn reset_to_sample(&mut self) {
        self.selection = SelectionState::default();
        self.replace_dataset(Dataset::sample());
    }

    pub fn delete_history_entry(&mut self, index: usize) -> Result<HistoryEntry, AppError> {
        self.history
            .remove(index)
            .ok_or_else(|| AppError::NotFound(format!("No history entry at index {}", index)))
    }

    pub fn filter_values(&self, field: &str) -> Vec<String> {
        filter_values(&self.dataset.rows, field)
    }

    pub fn chart(&self) -> ChartOutcome {
        let filtered = apply_filter(&self.dataset.rows, &self.selection.filter_field, &self.selection.filter_value);
        build_chart(&filtered, &self.selection)
    }

    pub fn report(&self) -> InsightReport {
        let filtered = apply_filter(&self.dataset.rows, &self.selection.filter_field, &self.selection.filter_value);
        InsightReport {
            basic: basic_insights(&self.dataset.meta(), &filtered, &self.schema.columns),
            columns: column_insights(&filtered, &self.schema.columns),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let filtered = apply_filter(&self.dataset.rows, &self.selection.filter_field, &self.selection.filter_value);
        let meta = self.dataset.meta();

        Snapshot {
            basic_insights: basic_insights(&meta, &filtered, &self.schema.columns),
            column_insights: column_insights(&filtered, &self.schema.columns),
            chart: build_chart(&filtered, &self.selection),
            filtered_rows: filtered.into_owned(),
            preview: self.dataset.rows.iter().take(PREVIEW_ROWS).cloned().collect(),
            dataset: meta,
            columns: self.schema.columns.clone(),
            numeric_columns: self.schema.numeric_columns.clone(),
            selection: self.selection.clone(),
            filter_field_stale: self.selection.filter_is_stale(&self.schema.columns),
        }
    }

    /// Write every persisted key for this workspace.
    pub fn persist(&self, state: &ClientState<'_>) -> Result<(), AppError> {
        self.persist_dataset(state)?;
        self.persist_selection(state)?;
        self.persist_history(state)
    }

    /// The bundled sample is never stored; persisting it clears the key.
    pub fn persist_dataset(&self, state: &ClientState<'_>) -> Result<(), AppError> {
        if self.dataset.is_sample() {
            return state.clear(StateKey::UploadedData);
        }
        state.save(StateKey::UploadedData, &StoredDataset::from_dataset(&self.dataset))
    }

    pub fn persist_selection(&self, state: &ClientState<'_>) -> Result<(), AppError> {
        state.save(StateKey::ChartSettings, &ChartSettings {
            chart_type: Some(self.selection.chart_type),
            x_field: Some(self.selection.x_field.clone()),
            y_fields: Some(self.selection.y_fields.clone()),
        })?;
        state.save(StateKey::Filters, &FilterSettings {
            filter_field: self.selection.filter_field.clone(),
            filter_value: self.selection.filter_value.clone(),
        })
    }

    pub fn persist_history(&self, state: &ClientState<'_>) -> Result<(), AppError> {
        state.save(StateKey::UploadHistory, &self.history.entries())
    }

    /// Forget the stored upload and selections; history is kept.
    pub fn clear_persisted(state: &ClientState<'_>) -> Result<(), AppError> {
        state.clear(StateKey::UploadedData)?;
        state.clear(StateKey::ChartSettings)?;
        state.clear(StateKey::Filters)
    }
}
