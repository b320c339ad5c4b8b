// In-Memory Order Store
// DashMap-backed implementation of the OrderStore trait. One shared instance
// backs the whole process; the controller is its only writer.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use crate::contracts::{CacheEntry, OrderCacheKey, OrderRecord, OrderStore};

/// Process-wide order cache keyed by composite request key.
///
/// DashMap gives per-key atomicity without a global lock, so readers on one
/// key never wait behind writers on another.
pub struct MemoryOrderStore {
    entries: DashMap<OrderCacheKey, CacheEntry>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of cached keys, loading and ready alike.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry. A table switch invalidates the whole cache.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for MemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn get(&self, key: &OrderCacheKey) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set_loading(&self, key: &OrderCacheKey) -> Result<()> {
        debug!("cache loading: {}", key);
        self.entries.insert(
            key.clone(),
            CacheEntry::Loading {
                since: Instant::now(),
            },
        );
        Ok(())
    }

    async fn set_ready(&self, key: &OrderCacheKey, orders: Arc<Vec<OrderRecord>>) -> Result<()> {
        debug!("cache ready: {} ({} orders)", key, orders.len());
        self.entries.insert(
            key.clone(),
            CacheEntry::Ready {
                orders,
                fetched_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &OrderCacheKey) -> Result<()> {
        debug!("cache delete: {}", key);
        self.entries.remove(key);
        Ok(())
    }
}

/// Create a shared in-memory store ready to hand to a controller.
pub fn create_memory_store() -> Arc<MemoryOrderStore> {
    Arc::new(MemoryOrderStore::new())
}
