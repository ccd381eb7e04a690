//! Database layer for gshub.
//!
//! Uses PostgreSQL for persistent storage with sqlx. Entity access goes
//! through the repository contracts in [`crate::repo`]; this module owns the
//! pool and the migration runner.

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::error::{ErrorCode, Result, ResultExt};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn new(database_url: &str, max_connections: u32, min_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .describe(ErrorCode::DatabaseError, "Migrations failed")
    }

    /// Check connectivity with a trivial round trip.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
