//! The storage collaborator of the evaluator.

use async_trait::async_trait;
use linkvec_core::{
    ComparisonFilter, EntityId, EventMetadata, FieldValue, NodeResultKey, NodeValue, Result, Vector,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Field recording which entity a chunk entity was split from.
pub const ORIGIN_ID_FIELD: &str = "__origin_id";

/// Nearest-neighbor request over stored index vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnSearchParams {
    /// Id of the index node whose results are searched.
    pub index_id: String,
    pub schema: String,
    pub vector: Vector,
    /// Hard filters on entity fields.
    #[serde(default)]
    pub filters: Vec<ComparisonFilter>,
    pub limit: usize,
    /// Hits with `1 - score > radius` are dropped.
    #[serde(default)]
    pub radius: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub entity: EntityId,
    pub score: f32,
}

/// Persistence of node results, event metadata and entity fields.
///
/// Reads of absent keys are not errors: `read` returns `None`, metadata
/// reads return the empty metadata and field reads an empty map.
#[async_trait]
pub trait NodeResultStore: Send + Sync {
    async fn read(&self, key: &NodeResultKey) -> Result<Option<NodeValue>>;

    async fn write(&self, key: &NodeResultKey, value: &NodeValue) -> Result<()>;

    /// Remove a node result. Deleting an absent key is not an error.
    async fn delete(&self, key: &NodeResultKey) -> Result<()>;

    async fn read_event_metadata(&self, key: &NodeResultKey) -> Result<EventMetadata>;

    async fn write_event_metadata(&self, key: &NodeResultKey, metadata: &EventMetadata) -> Result<()>;

    async fn read_fields(&self, entity: &EntityId) -> Result<HashMap<String, FieldValue>>;

    /// Merge `fields` into the stored fields of `entity`.
    async fn write_fields(&self, entity: &EntityId, fields: &HashMap<String, FieldValue>) -> Result<()>;

    async fn knn_search(&self, params: &KnnSearchParams) -> Result<Vec<SearchHit>>;
}

/// Score, filter and order candidates the way every backend does.
pub(crate) fn rank_candidates<'a, I>(params: &KnnSearchParams, candidates: I) -> Vec<SearchHit>
where
    I: IntoIterator<Item = (EntityId, &'a Vector, &'a HashMap<String, FieldValue>)>,
{
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter(|(_, vector, _)| vector.dim() == params.vector.dim())
        .filter(|(_, _, fields)| params.filters.iter().all(|f| f.matches_fields(fields)))
        .map(|(entity, vector, _)| SearchHit {
            entity,
            score: params.vector.dot(vector),
        })
        .filter(|hit| params.radius.map_or(true, |radius| 1.0 - hit.score <= radius))
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.entity.cmp(&b.entity))
    });
    hits.truncate(params.limit);
    hits
}
