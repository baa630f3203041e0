use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use crate::{
    error::AppError,
    models::{Dataset, DatasetMeta, Principal, Row},
    routes::upload_body_limit,
    services::{
        chart::ChartOutcome,
        dashboard::Upload,
        dataset_store::StoredFileSummary,
        excel::infer_schema,
        history::HistoryEntry,
        report::PagedReport,
        selection::SelectionPatch,
        state_store::FilterSettings,
        workspace::Snapshot,
    },
    AppState,
};

const UPLOAD_FIELD: &str = "file";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dashboard", get(get_dashboard))
        .route("/dashboard/chart", get(get_chart))
        .route("/dashboard/selection", patch(update_selection))
        .route("/dashboard/filter", put(update_filter))
        .route("/dashboard/filter-values", get(get_filter_values))
        .route("/dashboard/reset", post(reset_dashboard))
        .route("/datasets", post(upload_dataset).get(list_datasets))
        .route("/datasets/latest", get(latest_dataset))
        .route("/datasets/:id", get(get_dataset))
        .route("/history", get(get_history))
        .route("/history/:index", delete(delete_history_entry))
        .route("/insights/report.txt", get(report_text))
        .route("/insights/report/pages", get(report_pages))
}

#[derive(Debug, Deserialize)]
pub struct FilterValuesQuery {
    field: String,
}

#[derive(Debug, Serialize)]
pub struct FilterValuesResponse {
    field: String,
    values: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    paged: bool,
}

#[derive(Debug, Serialize)]
pub struct DatasetResponse {
    dataset: DatasetMeta,
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl From<Dataset> for DatasetResponse {
    fn from(dataset: Dataset) -> Self {
        let columns = infer_schema(&dataset.rows).columns;
        Self {
            dataset: dataset.meta(),
            columns,
            rows: dataset.rows,
        }
    }
}

async fn get_dashboard(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Json<Snapshot> {
    Json(state.dashboard.snapshot(&principal))
}

async fn get_chart(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Json<ChartOutcome> {
    Json(state.dashboard.chart(&principal))
}

async fn update_selection(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(patch): Json<SelectionPatch>,
) -> Result<Json<Snapshot>, AppError> {
    tracing::debug!("Selection update for {}: {:?}", principal, patch);
    Ok(Json(state.dashboard.set_selection(&principal, patch)?))
}

async fn update_filter(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(filter): Json<FilterSettings>,
) -> Result<Json<Snapshot>, AppError> {
    tracing::debug!(
        "Filter update for {}: {}={:?}",
        principal,
        filter.filter_field,
        filter.filter_value
    );
    Ok(Json(state.dashboard.set_filter(
        &principal,
        &filter.filter_field,
        &filter.filter_value,
    )?))
}

async fn get_filter_values(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(query): Query<FilterValuesQuery>,
) -> Json<FilterValuesResponse> {
    let values = state.dashboard.filter_values(&principal, &query.field);
    Json(FilterValuesResponse {
        field: query.field,
        values,
    })
}

async fn reset_dashboard(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Snapshot>, AppError> {
    Ok(Json(state.dashboard.reset_to_sample(&principal)?))
}

async fn upload_dataset(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Snapshot>), AppError> {
    let max_file_size = state.dashboard.max_file_size();
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_file_size))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            tracing::debug!("Skipping multipart field {:?}", field.name());
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, max_file_size))?;
        upload = Some(Upload {
            file_name,
            content_type,
            data,
        });
    }

    let upload = upload.ok_or_else(|| {
        AppError::InvalidInput(format!("Multipart field '{}' is required", UPLOAD_FIELD))
    })?;
    let snapshot = state.dashboard.load_dataset(&principal, upload).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

fn multipart_error(err: axum::extract::multipart::MultipartError, max_file_size: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::FileTooLarge {
            size: upload_body_limit(max_file_size),
            limit: max_file_size,
        }
    } else {
        AppError::InvalidInput(format!("Malformed upload: {}", err.body_text()))
    }
}

async fn list_datasets(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<Vec<StoredFileSummary>>, AppError> {
    Ok(Json(state.dashboard.stored_files(&principal)?))
}

async fn latest_dataset(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<Json<DatasetResponse>, AppError> {
    Ok(Json(state.dashboard.latest_stored(&principal)?.into()))
}

async fn get_dataset(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<DatasetResponse>, AppError> {
    Ok(Json(state.dashboard.stored_file(&principal, id)?.into()))
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Json<Vec<HistoryEntry>> {
    Json(state.dashboard.history(&principal))
}

async fn delete_history_entry(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(index): Path<usize>,
) -> Result<Json<HistoryEntry>, AppError> {
    Ok(Json(state.dashboard.delete_history_entry(&principal, index)?))
}

async fn report_text(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Query(query): Query<ReportQuery>,
) -> impl IntoResponse {
    let report = state.dashboard.report(&principal);
    let body = if query.paged {
        report.render_paged_text(state.dashboard.layout())
    } else {
        report.render_text()
    };
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body)
}

async fn report_pages(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Json<PagedReport> {
    Json(state.dashboard.report(&principal).paginate(state.dashboard.layout()))
}
