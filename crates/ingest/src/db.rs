use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use biosource_core::PostgresConfig;

/// Create a PostgreSQL connection pool and run migrations.
/// Returns None if PostgreSQL is not configured or unreachable; callers
/// fall back to the in-memory repositories.
pub async fn init_pg_pool(config: &PostgresConfig) -> Option<PgPool> {
    if !config.is_configured() {
        warn!("PG_USERNAME not configured, using in-memory job repository");
        return None;
    }

    let pool = match PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            warn!(host = %config.host, error = %e, "Failed to connect to PostgreSQL");
            return None;
        }
    };

    info!(host = %config.host, db = %config.database, "PostgreSQL connected");
    match sqlx::migrate!("../../migrations").run(&pool).await {
        Ok(_) => {
            info!("Database migrations applied successfully");
            Some(pool)
        }
        Err(e) => {
            warn!(error = %e, "Failed to run migrations");
            None
        }
    }
}
