use std::sync::Arc;

use sqlx::PgPool;
use tracing::info;

use crate::config::{BackendKind, Config};
use crate::db;
use crate::jobs::dispatch::DispatchQueue;
use crate::jobs::memory::{InMemoryDispatchQueue, InMemoryJobStore};
use crate::jobs::repo::{DispatchRepo, JobsRepo};
use crate::jobs::store::JobStore;

/// Connection to the backing store: one Job Record Store plus one Priority
/// Dispatch Queue. Built once per process and handed to every component.
#[derive(Clone)]
pub struct Backend {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn DispatchQueue>,
}

impl Backend {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn DispatchQueue>) -> Self {
        Self { store, queue }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(InMemoryDispatchQueue::new()),
        )
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self::new(
            Arc::new(JobsRepo::new(pool.clone())),
            Arc::new(DispatchRepo::new(pool)),
        )
    }

    #[cfg(feature = "redis")]
    pub async fn redis(url: &str) -> anyhow::Result<Self> {
        use crate::jobs::redis_store::{RedisDispatchQueue, RedisJobStore};

        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self::new(
            Arc::new(RedisJobStore::new(conn.clone())),
            Arc::new(RedisDispatchQueue::new(conn)),
        ))
    }

    pub async fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        match cfg.backend {
            BackendKind::Memory => {
                info!("using in-memory backend");
                Ok(Self::in_memory())
            }
            BackendKind::Postgres => {
                let url = cfg
                    .database_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is missing"))?;
                let pool = db::make_pool(url).await?;
                if cfg.migrate_on_startup {
                    db::run_migrations(&pool).await?;
                    info!("migrations applied");
                }
                info!("using postgres backend");
                Ok(Self::postgres(pool))
            }
            BackendKind::Redis => Self::redis_from_config(cfg).await,
        }
    }

    #[cfg(feature = "redis")]
    async fn redis_from_config(cfg: &Config) -> anyhow::Result<Self> {
        let url = cfg
            .redis_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("REDIS_URL is missing"))?;
        info!("using redis backend");
        Self::redis(url).await
    }

    #[cfg(not(feature = "redis"))]
    async fn redis_from_config(_cfg: &Config) -> anyhow::Result<Self> {
        anyhow::bail!(
            "redis backend requested but dispatchflow was built without the `redis` feature"
        )
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    pub fn queue(&self) -> Arc<dyn DispatchQueue> {
        Arc::clone(&self.queue)
    }
}
