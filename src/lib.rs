pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;

use std::path::Path;
use std::sync::Arc;
use crate::config::Config;
use crate::error::AppError;
use crate::services::dashboard::DashboardService;
use crate::services::dataset_store::{DatasetStore, SqliteDatasetStore};
use crate::services::state_store::{KeyValueStore, SqliteStore};

// Application state
pub struct AppState {
    pub config: Config,
    pub dashboard: DashboardService,
}

impl AppState {
    pub fn new(config: Config, kv: Arc<dyn KeyValueStore>, datasets: Arc<dyn DatasetStore>) -> Self {
        let dashboard = DashboardService::new(kv, datasets, &config);
        Self { config, dashboard }
    }

    /// Open both SQLite-backed stores at `config.database_path`, creating its directory.
    pub fn from_config(config: Config) -> Result<Self, AppError> {
        let (kv, datasets) = if config.database_path == ":memory:" {
            (SqliteStore::open_in_memory()?, SqliteDatasetStore::open_in_memory()?)
        } else {
            if let Some(dir) = Path::new(&config.database_path).parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir)?;
                }
            }
            (
                SqliteStore::open(&config.database_path)?,
                SqliteDatasetStore::open(&config.database_path)?,
            )
        };
        Ok(Self::new(config, Arc::new(kv), Arc::new(datasets)))
    }
}
