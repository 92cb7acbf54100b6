//! Key-value persistence for conversation/thread correlation entries.
//!
//! The store is the only state shared between webhook deliveries. Two
//! backends exist:
//! - `RedisMappingStore`: the durable networked store used in production
//! - `InMemoryMappingStore`: process-local map for tests and local runs
//!
//! Backend errors are outages, never "absent". Callers decide how to degrade.

mod memory;
mod redis_store;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::InMemoryMappingStore;
pub use redis_store::RedisMappingStore;

#[derive(Debug, thiserror::Error)]
pub enum MappingStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("mapping store lock poisoned")]
    LockPoisoned,
}

#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, MappingStoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), MappingStoreError>;

    /// Writes `value` only when `key` has no entry. Returns whether the write happened.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, MappingStoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingStoreBackend {
    Redis { url: String },
    Memory,
}

impl MappingStoreBackend {
    pub fn name(&self) -> &'static str {
        match self {
            MappingStoreBackend::Redis { .. } => "redis",
            MappingStoreBackend::Memory => "memory",
        }
    }
}

/// Connects the configured backend. A Redis backend that cannot be reached
/// fails here so the gateway never starts accepting traffic without its store.
pub async fn build_mapping_store(
    backend: &MappingStoreBackend,
) -> Result<Arc<dyn MappingStore>, MappingStoreError> {
    match backend {
        MappingStoreBackend::Redis { url } => {
            let store = RedisMappingStore::connect(url).await?;
            Ok(Arc::new(store))
        }
        MappingStoreBackend::Memory => Ok(Arc::new(InMemoryMappingStore::new())),
    }
}
