use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::str::FromStr;

fn default_max_file_size() -> usize {
    // 5 MB in bytes
    5 * 1024 * 1024
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_path: String,
    pub max_file_size: usize,
    pub report_width: usize,
    pub report_lines_per_page: usize,
    pub max_sessions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            database_path: ":memory:".to_string(),
            max_file_size: default_max_file_size(),
            report_width: 90,
            report_lines_per_page: 56,
            max_sessions: 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file first
        dotenv().ok();

        let defaults = Config::default();

        Ok(Config {
            bind_addr: env_or("SHEET_INSIGHTS_ADDR", defaults.bind_addr)?,
            database_path: std::env::var("SHEET_INSIGHTS_DATABASE")
                .unwrap_or_else(|_| "sheet_insights.db".to_string()),
            max_file_size: env_or("SHEET_INSIGHTS_MAX_UPLOAD_BYTES", defaults.max_file_size)?,
            report_width: env_or("SHEET_INSIGHTS_REPORT_WIDTH", defaults.report_width)?,
            report_lines_per_page: env_or("SHEET_INSIGHTS_REPORT_LINES", defaults.report_lines_per_page)?,
            max_sessions: env_or("SHEET_INSIGHTS_MAX_SESSIONS", defaults.max_sessions)?,
        })
    }
}

pub fn load_config() -> Result<Config> {
    let config = Config::from_env()?;
    tracing::info!(
        "Configuration loaded: addr={}, database={}, max upload={}KB, sessions={}",
        config.bind_addr,
        config.database_path,
        config.max_file_size / 1024,
        config.max_sessions
    );
    Ok(config)
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Failed to parse {}={:?}", key, raw)),
        Err(_) => Ok(default),
    }
}
