use crate::store::{KnnSearchParams, NodeResultStore, SearchHit};
use linkvec_core::{
    retry_idempotent, EntityId, EventMetadata, FieldValue, NodeResultKey, NodeValue, Result, RetryPolicy,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Lock entries are pruned once the registry grows past this size.
const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// Front of a [`NodeResultStore`] used by the evaluator.
///
/// Reads are idempotent and retried according to the [`RetryPolicy`];
/// writes are attempted once and failures surface to the caller. Updates
/// of one entity are serialized through [`StorageManager::lock_entity`].
#[derive(Clone)]
pub struct StorageManager {
    store: Arc<dyn NodeResultStore>,
    retry: RetryPolicy,
    locks: Arc<Mutex<HashMap<EntityId, Arc<AsyncMutex<()>>>>>,
}

impl StorageManager {
    pub fn new(store: Arc<dyn NodeResultStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[inline]
    pub fn store(&self) -> &Arc<dyn NodeResultStore> {
        &self.store
    }

    #[inline]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Wait for exclusive access to `entity`. The lock is held until the
    /// guard is dropped.
    pub async fn lock_entity(&self, entity: &EntityId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() > LOCK_PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(entity.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of entities with a live or cached lock entry.
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    pub async fn read(&self, key: &NodeResultKey) -> Result<Option<NodeValue>> {
        retry_idempotent(&self.retry, "read", || self.store.read(key)).await
    }

    pub async fn read_vector(&self, key: &NodeResultKey) -> Result<Option<linkvec_core::Vector>> {
        Ok(self.read(key).await?.and_then(NodeValue::into_vector))
    }

    pub async fn write(&self, key: &NodeResultKey, value: &NodeValue) -> Result<()> {
        debug!(key = %key, "writing node result");
        self.store.write(key, value).await
    }

    pub async fn delete(&self, key: &NodeResultKey) -> Result<()> {
        debug!(key = %key, "deleting node result");
        self.store.delete(key).await
    }

    pub async fn read_event_metadata(&self, key: &NodeResultKey) -> Result<EventMetadata> {
        retry_idempotent(&self.retry, "read_event_metadata", || self.store.read_event_metadata(key)).await
    }

    pub async fn write_event_metadata(&self, key: &NodeResultKey, metadata: &EventMetadata) -> Result<()> {
        self.store.write_event_metadata(key, metadata).await
    }

    pub async fn read_fields(&self, entity: &EntityId) -> Result<HashMap<String, FieldValue>> {
        retry_idempotent(&self.retry, "read_fields", || self.store.read_fields(entity)).await
    }

    pub async fn write_fields(&self, entity: &EntityId, fields: &HashMap<String, FieldValue>) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        self.store.write_fields(entity, fields).await
    }

    pub async fn knn_search(&self, params: &KnnSearchParams) -> Result<Vec<SearchHit>> {
        retry_idempotent(&self.retry, "knn_search", || self.store.knn_search(params)).await
    }
}
