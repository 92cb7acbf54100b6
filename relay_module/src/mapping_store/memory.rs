use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{MappingStore, MappingStoreError};

/// Process-local mapping store. Entries live as long as the process.
#[derive(Debug, Default)]
pub struct InMemoryMappingStore {
    entries: Mutex<HashMap<String, String>>,
    accesses: AtomicUsize,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds entries without counting them as accesses.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self {
            entries: Mutex::new(map),
            accesses: AtomicUsize::new(0),
        }
    }

    /// Number of get/set calls served so far.
    pub fn access_count(&self) -> usize {
        self.accesses.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Result<HashMap<String, String>, MappingStoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| MappingStoreError::LockPoisoned)?;
        Ok(entries.clone())
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MappingStoreError> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        let entries = self
            .entries
            .lock()
            .map_err(|_| MappingStoreError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), MappingStoreError> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| MappingStoreError::LockPoisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, MappingStoreError> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| MappingStoreError::LockPoisoned)?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(true)
    }
}
