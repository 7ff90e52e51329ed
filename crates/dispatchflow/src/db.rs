use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

fn env_num<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Pool for the Postgres backend. Sizing comes from
/// `DISPATCHFLOW_DB_MAX_CONNECTIONS` and `DISPATCHFLOW_DB_ACQUIRE_TIMEOUT_SECS`.
pub async fn make_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let max_connections = env_num::<u32>("DISPATCHFLOW_DB_MAX_CONNECTIONS")
        .unwrap_or(8)
        .clamp(1, 64);
    let acquire_timeout = Duration::from_secs(
        env_num::<u64>("DISPATCHFLOW_DB_ACQUIRE_TIMEOUT_SECS")
            .unwrap_or(5)
            .clamp(1, 60),
    );

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    info!(max_connections, "postgres pool ready");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
