//! VPDB API server, library crate.
//!
//! Exposes the router and its state so integration tests in `tests/` can
//! drive the full stack on in-memory backends.

use std::sync::Arc;

use tokio::sync::Notify;

pub mod api;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod kv;
pub mod middleware;
pub mod models;
pub mod store;

use config::Config;
use jobs::JobTracker;
use kv::{KvStore, MemoryKv, RedisKv};
use middleware::acl::{Acl, RoleAcl};
use middleware::api_cache::ApiCache;
use store::memory::MemoryStore;
use store::postgres::PgStore;
use store::{Db, DocumentStore};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: Config,
    pub db: Db,
    pub kv: Arc<dyn KvStore>,
    pub cache: ApiCache,
    pub acl: Arc<dyn Acl>,
    pub jobs: JobTracker,
    /// Notified by the kill switch to stop the server.
    pub shutdown: Arc<Notify>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn DocumentStore>, kv: Arc<dyn KvStore>) -> Self {
        let cache = ApiCache::new(api::cache_config(config.api_cache_ttl), kv.clone());
        Self {
            config,
            db: Db::new(store),
            kv,
            cache,
            acl: Arc::new(RoleAcl::new()),
            jobs: JobTracker::new(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn in_memory(config: Config) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()), Arc::new(MemoryKv::new()))
    }

    /// Connects to Postgres and Redis and applies pending migrations.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        tracing::info!("Connecting to database...");
        let pg = PgStore::connect(&config.database_url).await?;
        tracing::info!("Running migrations...");
        pg.migrate().await?;

        tracing::info!("Connecting to Redis...");
        let kv = RedisKv::connect(&config.redis_url).await?;

        Ok(Self::new(config, Arc::new(pg), Arc::new(kv)))
    }
}
