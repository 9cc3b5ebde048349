use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::db::build_pool;
use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn build(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db_pool = match config.supabase_db_url.as_deref() {
            Some(url) => Some(build_pool(url, &config)?),
            None => {
                tracing::warn!(
                    "SUPABASE_DB_URL / DATABASE_URL is not set — database routes will fail"
                );
                None
            }
        };

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            db_pool,
            http_client,
        })
    }

    pub fn require_db(&self) -> AppResult<&PgPool> {
        self.db_pool.as_ref().ok_or_else(|| {
            AppError::Dependency(
                "Database is not configured. Set SUPABASE_DB_URL or DATABASE_URL.".to_string(),
            )
        })
    }
}
