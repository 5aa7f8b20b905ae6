use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use super::{
    auth::JwtKeys,
    config::{Backend, Config},
    database::{Database, MemoryDatabase, RedisDatabase, init_redis},
    search::{MemoryIndex, SearchIndex, init_meilisearch},
    storage::{MemoryStore, ObjectStore, S3Store},
};

pub struct State {
    pub config: Config,
    pub db: Arc<dyn Database>,
    pub search: Arc<dyn SearchIndex>,
    pub storage: Arc<dyn ObjectStore>,
    pub jwt: JwtKeys,
}

impl State {
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        if config.backend == Backend::Memory {
            warn!("DATA_BACKEND=memory, nothing will be persisted");
            return Ok(Self::in_memory(config));
        }

        info!("Connecting to Redis...");
        let redis_connection = init_redis(&config.redis_url).await?;
        let db = Arc::new(RedisDatabase::new(redis_connection));

        info!("Connecting to Meilisearch...");
        let meili_index = init_meilisearch(&config.meili_url, config.meili_key.as_deref()).await?;
        let search = Arc::new(meili_index);

        info!("Connecting to object storage...");
        let storage = Arc::new(S3Store::new(&config.minio)?);
        if let Err(e) = storage.ensure_bucket().await {
            warn!("Bucket {} not verified: {e}", config.minio.bucket);
        }

        Ok(Self::with_parts(config, db, search, storage))
    }

    pub fn in_memory(config: Config) -> Arc<Self> {
        Self::with_parts(
            config,
            Arc::new(MemoryDatabase::new()),
            Arc::new(MemoryIndex::new()),
            Arc::new(MemoryStore::new()),
        )
    }

    pub fn with_parts(
        config: Config,
        db: Arc<dyn Database>,
        search: Arc<dyn SearchIndex>,
        storage: Arc<dyn ObjectStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            jwt: JwtKeys::new(&config.jwt_secret),
            config,
            db,
            search,
            storage,
        })
    }
}
