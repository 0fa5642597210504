//! In-memory store, used by tests and short-lived pipelines.

use crate::store::{rank_candidates, KnnSearchParams, NodeResultStore, SearchHit};
use ahash::AHashMap;
use async_trait::async_trait;
use linkvec_core::{EntityId, EventMetadata, FieldValue, NodeResultKey, NodeValue, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    results: RwLock<AHashMap<NodeResultKey, NodeValue>>,
    metadata: RwLock<AHashMap<NodeResultKey, EventMetadata>>,
    fields: RwLock<AHashMap<EntityId, HashMap<String, FieldValue>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored node results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty()
    }
}

#[async_trait]
impl NodeResultStore for InMemoryStore {
    async fn read(&self, key: &NodeResultKey) -> Result<Option<NodeValue>> {
        Ok(self.results.read().get(key).cloned())
    }

    async fn write(&self, key: &NodeResultKey, value: &NodeValue) -> Result<()> {
        self.results.write().insert(key.clone(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &NodeResultKey) -> Result<()> {
        self.results.write().remove(key);
        Ok(())
    }

    async fn read_event_metadata(&self, key: &NodeResultKey) -> Result<EventMetadata> {
        Ok(self.metadata.read().get(key).copied().unwrap_or_default())
    }

    async fn write_event_metadata(&self, key: &NodeResultKey, metadata: &EventMetadata) -> Result<()> {
        self.metadata.write().insert(key.clone(), *metadata);
        Ok(())
    }

    async fn read_fields(&self, entity: &EntityId) -> Result<HashMap<String, FieldValue>> {
        Ok(self.fields.read().get(entity).cloned().unwrap_or_default())
    }

    async fn write_fields(&self, entity: &EntityId, fields: &HashMap<String, FieldValue>) -> Result<()> {
        self.fields
            .write()
            .entry(entity.clone())
            .or_default()
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn knn_search(&self, params: &KnnSearchParams) -> Result<Vec<SearchHit>> {
        let results = self.results.read();
        let fields = self.fields.read();
        let no_fields = HashMap::new();
        let candidates = results.iter().filter_map(|(key, value)| {
            if key.node_id != params.index_id || key.entity.schema != params.schema {
                return None;
            }
            let vector = value.as_vector()?;
            let entity_fields = fields.get(&key.entity).unwrap_or(&no_fields);
            Some((key.entity.clone(), vector, entity_fields))
        });
        Ok(rank_candidates(params, candidates))
    }
}
