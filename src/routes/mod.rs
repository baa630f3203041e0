use axum::{
    extract::{DefaultBodyLimit, FromRequestParts},
    http::{request::Parts, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use crate::{error::AppError, models::Principal, AppState};

pub mod dashboard;

pub const PRINCIPAL_HEADER: &str = "x-user-id";

// room for multipart boundaries and part headers on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "OK"
}

/// Request body cap for a given upload limit.
pub fn upload_body_limit(max_file_size: usize) -> usize {
    max_file_size.saturating_add(MULTIPART_OVERHEAD)
}

pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .merge(routes::<Arc<AppState>>())
        .merge(dashboard::routes())
        .layer(DefaultBodyLimit::max(upload_body_limit(state.config.max_file_size)))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Unauthorized(format!("Missing {} header", PRINCIPAL_HEADER)))?;
        Ok(Principal::new(id))
    }
}
