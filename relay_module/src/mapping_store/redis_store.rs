use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use super::{MappingStore, MappingStoreError};

/// Redis-backed mapping store. Keys carry no TTL; entries are never deleted.
#[derive(Clone)]
pub struct RedisMappingStore {
    manager: ConnectionManager,
}

impl RedisMappingStore {
    pub async fn connect(redis_url: &str) -> Result<Self, MappingStoreError> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        info!("mapping store connected to redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl MappingStore for RedisMappingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MappingStoreError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), MappingStoreError> {
        let mut conn = self.manager.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, MappingStoreError> {
        let mut conn = self.manager.clone();
        let inserted: bool = conn.set_nx(key, value).await?;
        Ok(inserted)
    }
}
