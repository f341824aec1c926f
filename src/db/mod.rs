//! Database connection pool, migrations, and health check.

pub mod failover;
pub mod listener;
pub mod work;

pub use failover::FailoverDb;

use crate::error::Result;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Database handle. Owns the connection pool shared by the store and listener.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Whether the work table exists (for `check`, before migrating).
    pub async fn has_schema(&self) -> Result<bool> {
        let row: (bool,) =
            sqlx::query_as("SELECT to_regclass('public.questions_answers') IS NOT NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
