//! Application state shared by the CLI command handlers.
//!
//! Contains the merged settings, the connection pool and the dispatch
//! service wired against the Postgres repositories.

use crate::config::Settings;
use crate::db::{AsyncDbPool, establish_async_connection_pool};
use crate::error::AppResult;
use crate::repositories::Repositories;
use crate::services::{DispatchService, build_gateway};

/// Cloning is cheap: the pool and every service hold `Arc`s internally.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub db_pool: AsyncDbPool,
    pub services: DispatchService,
}

impl AppState {
    /// Builds the state from an existing pool.
    ///
    /// # Errors
    ///
    /// Fails when the configured gateway cannot build its HTTP client.
    pub fn new(pool: AsyncDbPool, settings: Settings) -> AppResult<Self> {
        let repos = Repositories::postgres(pool.clone());
        let gateway = build_gateway(&settings.gateway)?;
        let services =
            DispatchService::new(repos, gateway, &settings.scheduler, &settings.delivery);

        Ok(Self {
            settings,
            db_pool: pool,
            services,
        })
    }

    /// Opens the connection pool and builds the state.
    pub async fn connect(settings: Settings) -> AppResult<Self> {
        let pool = establish_async_connection_pool(&settings.database).await?;
        Self::new(pool, settings)
    }
}
