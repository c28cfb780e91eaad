/// Database Module
///
/// This module handles all MySQL database operations including:
/// - Connection pool management with a bulk-load session hook
/// - Schema migrations
/// - Connection health checks
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{Executor, MySqlPool};

/// Session statements applied before a bulk load.
///
/// These relax per-row constraint checks and the isolation level for the
/// duration of an ingestion run; referential integrity is only guaranteed
/// once the run has completed and the defaults are restored.
pub(crate) const BULK_SESSION_SETTINGS: &[&str] =
    &["set unique_checks=0", "set foreign_key_checks=0", "set session transaction_isolation='READ-UNCOMMITTED'"];

/// Session statements restoring the server defaults after a bulk load.
pub(crate) const RESTORE_SESSION_SETTINGS: &[&str] =
    &["set unique_checks=1", "set foreign_key_checks=1", "set session transaction_isolation='REPEATABLE-READ'"];

#[derive(Clone)]
pub struct Database {
    pool: MySqlPool,
    bulk_mode: Arc<AtomicBool>,
}

impl Database {
    /// Create a new database connection pool.
    ///
    /// Session settings are per-connection in MySQL, so the pool carries a
    /// `before_acquire` hook: every acquired connection receives the
    /// settings matching the current mode, whether it was established
    /// before the run or kept warm as idle. Half of the pool is kept idle.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let bulk_mode = Arc::new(AtomicBool::new(false));
        let hook_flag = bulk_mode.clone();

        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(max_connections / 2)
            .max_lifetime(Duration::from_secs(5 * 60))
            .before_acquire(move |conn, _meta| {
                let flag = hook_flag.clone();
                Box::pin(async move {
                    let settings = if flag.load(Ordering::Relaxed) {
                        BULK_SESSION_SETTINGS
                    } else {
                        RESTORE_SESSION_SETTINGS
                    };
                    for stmt in settings {
                        conn.execute(*stmt).await?;
                    }
                    Ok(true)
                })
            })
            .connect(database_url)
            .await
            .context("Failed to connect to MySQL database")?;

        Ok(Self { pool, bulk_mode })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Toggle which session settings the acquire hook applies
    pub fn set_bulk_mode(&self, enabled: bool) {
        self.bulk_mode.store(enabled, Ordering::Relaxed);
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.context("Failed to run database migrations")?;

        tracing::info!("Database migrations completed successfully");
        Ok(())
    }

    /// Test the database connection
    pub async fn test_connection(&self) -> Result<()> {
        sqlx::query("select 1").execute(&self.pool).await.context("Database connection test failed")?;

        Ok(())
    }
}
