use anyhow::Result;
use std::sync::Arc;
use sheet_insights::{config, logging, routes, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging()?;

    let config = config::load_config()?;
    let addr = config.bind_addr;

    let state = Arc::new(AppState::from_config(config)?);
    let app = routes::app(state);

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
