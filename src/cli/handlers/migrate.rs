//! Migrate command handler
//!
//! Applies, previews or reverts the embedded SQL migrations. Migrations run on
//! a blocking `PgConnection` because `diesel_migrations` is synchronous.

use diesel::Connection;
use diesel::pg::PgConnection;
use diesel_migrations::MigrationHarness;

use crate::config::settings::DatabaseConfig;
use crate::db::MIGRATIONS;
use crate::error::{AppError, AppResult};

pub struct MigrateCommandHandler {
    database: DatabaseConfig,
}

impl MigrateCommandHandler {
    pub fn new(database: DatabaseConfig) -> Self {
        Self { database }
    }

    /// # Errors
    /// - Database connection errors
    /// - Migration execution errors
    /// - `rollback` of zero steps or more steps than are applied
    pub async fn execute(&self, dry_run: bool, rollback: Option<u32>) -> AppResult<()> {
        if rollback == Some(0) {
            return Err(AppError::validation(
                "rollback_steps",
                "Number of rollback steps must be greater than 0",
            ));
        }
        self.database.validate().map_err(|e| AppError::Configuration {
            key: "database".to_string(),
            source: anyhow::Error::from(e),
        })?;

        if dry_run {
            let pending = self.pending_migrations().await?;
            if pending.is_empty() {
                println!("✓ No pending migrations found - database is up to date");
            } else {
                println!("Found {} pending migration(s):", pending.len());
                for name in &pending {
                    println!("  - {}", name);
                }
                println!("\nRun without --dry-run to apply these migrations");
            }
            return Ok(());
        }

        match rollback {
            Some(steps) => {
                let reverted = self.rollback(steps).await?;
                println!("✓ Rolled back {} migration(s):", reverted.len());
                for name in &reverted {
                    println!("  - {}", name);
                }
            }
            None => {
                let applied = self.run_pending().await?;
                if applied.is_empty() {
                    println!("✓ No migrations to apply - database is already up to date");
                } else {
                    println!("✓ Applied {} migration(s):", applied.len());
                    for name in &applied {
                        println!("  - {}", name);
                    }
                }
            }
        }

        Ok(())
    }

    /// Applies pending migrations and returns their names.
    pub async fn run_pending(&self) -> AppResult<Vec<String>> {
        let applied: Vec<String> = self
            .with_connection("run pending migrations", |conn| {
                conn.run_pending_migrations(MIGRATIONS)
                    .map(|versions| versions.iter().map(|v| v.to_string()).collect())
            })
            .await?;
        tracing::info!(applied = applied.len(), "Database migrations applied");
        Ok(applied)
    }

    async fn pending_migrations(&self) -> AppResult<Vec<String>> {
        self.with_connection("check pending migrations", |conn| {
            conn.pending_migrations(MIGRATIONS)
                .map(|pending| pending.iter().map(|m| m.name().to_string()).collect())
        })
        .await
    }

    async fn rollback(&self, steps: u32) -> AppResult<Vec<String>> {
        let applied: usize = self
            .with_connection("get applied migrations", |conn| {
                conn.applied_migrations()
                    .map(|versions| versions.len())
            })
            .await?;

        if applied < steps as usize {
            return Err(AppError::validation(
                "rollback_steps",
                format!(
                    "Cannot rollback {} migrations - only {} applied migrations available",
                    steps, applied
                ),
            ));
        }

        let reverted: Vec<String> = self
            .with_connection("revert migration", move |conn| {
                let mut reverted = Vec::with_capacity(steps as usize);
                for _ in 0..steps {
                    reverted.push(conn.revert_last_migration(MIGRATIONS)?.to_string());
                }
                Ok(reverted)
            })
            .await?;
        tracing::warn!(reverted = reverted.len(), "Database migrations reverted");
        Ok(reverted)
    }

    /// Runs `op` on a fresh blocking connection inside `spawn_blocking`.
    async fn with_connection<T, F>(&self, operation: &'static str, op: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(
                &mut PgConnection,
            ) -> Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>
            + Send
            + 'static,
    {
        let database_url = self.database.url.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn =
                PgConnection::establish(&database_url).map_err(|e| AppError::Database {
                    operation: format!("establish connection to {}", operation),
                    source: anyhow::anyhow!("Connection error: {}", e),
                })?;

            op(&mut conn).map_err(|e| AppError::Database {
                operation: operation.to_string(),
                source: anyhow::anyhow!("Migration error: {}", e),
            })
        })
        .await
        .map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_rollback_steps_rejected() {
        let handler = MigrateCommandHandler::new(DatabaseConfig {
            url: "postgres://localhost/dispatch".to_string(),
            ..DatabaseConfig::default()
        });

        match handler.execute(false, Some(0)).await {
            Err(AppError::Validation { field, reason }) => {
                assert_eq!(field, "rollback_steps");
                assert!(reason.contains("must be greater than 0"));
            }
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_database_url_rejected_before_connecting() {
        let handler = MigrateCommandHandler::new(DatabaseConfig::default());

        match handler.execute(true, None).await {
            Err(AppError::Configuration { key, .. }) => assert_eq!(key, "database"),
            other => panic!("Expected configuration error, got {:?}", other),
        }
    }
}
