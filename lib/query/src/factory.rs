//! Query vector assembly
//!
//! A query vector mirrors the index vector of its target entity type: one
//! segment per space in the layout of the type's concatenation node. Each
//! segment combines the query's similar-to values and the matching segment
//! of a looks-like entity, then is scaled by the space weight. Query vectors
//! are not normalized, so weights keep expressing intent in the score.

use crate::query::QueryDescriptor;
use linkvec_core::aggregation::{aggregate_weighted, reweight};
use linkvec_core::{EntityId, Error, ExecutionContext, NodeResultKey, Result, Vector};
use linkvec_dag::{Dag, NodeIndex, NodeKind, Space, SpaceSegment};
use linkvec_embedding::{EmbeddingTransform, ModelRegistry};
use linkvec_storage::StorageManager;
use std::sync::Arc;
use tracing::debug;

pub struct QueryVectorFactory {
    dag: Arc<Dag>,
    storage: StorageManager,
    models: ModelRegistry,
}

impl QueryVectorFactory {
    pub fn new(dag: Arc<Dag>, storage: StorageManager, models: ModelRegistry) -> Self {
        Self { dag, storage, models }
    }

    #[inline]
    pub fn dag(&self) -> &Arc<Dag> {
        &self.dag
    }

    #[inline]
    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// The concatenation node feeding the index for `schema`. Zero or
    /// several candidate branches make the query ambiguous.
    pub fn branch(&self, schema: &str) -> Result<NodeIndex> {
        if self.dag.schema(schema)?.is_event() {
            return Err(Error::QueryBranch(format!("{} is an event type and has no index vectors", schema)));
        }
        let index = self.dag.node(self.dag.index_node());
        let candidates: Vec<NodeIndex> = index
            .parents()
            .iter()
            .copied()
            .filter(|&p| {
                let node = self.dag.node(p);
                matches!(node.kind(), NodeKind::Concatenation { .. }) && node.has_schema(schema)
            })
            .collect();
        match candidates.as_slice() {
            [branch] => Ok(*branch),
            [] => Err(Error::QueryBranch(format!("no branch of index {} covers {}", self.dag.index_name(), schema))),
            _ => Err(Error::QueryBranch(format!(
                "{} branches of index {} cover {}",
                candidates.len(),
                self.dag.index_name(),
                schema
            ))),
        }
    }

    pub async fn query_vector(&self, query: &QueryDescriptor, context: &ExecutionContext) -> Result<Vector> {
        if !context.is_query() {
            return Err(Error::InvalidInput("query vectors need a query context".into()));
        }
        query.validate()?;
        let branch = self.branch(&query.schema)?;
        let layout = match self.dag.node(branch).kind() {
            NodeKind::Concatenation { layout } => layout,
            other => {
                return Err(Error::InvalidDagStructure(format!(
                    "query branch is a {} node",
                    other.name()
                )))
            }
        };
        for space in query.space_weights.keys().chain(query.similar.iter().map(|c| &c.space)) {
            self.dag.space(space)?;
        }

        let looks_like = self.looks_like_segments(query, branch).await?;
        let mut segments = Vec::with_capacity(layout.len());
        for (i, segment) in layout.iter().enumerate() {
            let space = self.dag.space(&segment.space)?;
            let stored = looks_like.as_ref().map(|(segments, weight)| (&segments[i], *weight));
            segments.push(self.segment(query, space, segment, stored, context).await?);
        }

        let lengths: Vec<usize> = layout.iter().map(|segment| segment.length).collect();
        let weights: Vec<f32> = layout.iter().map(|segment| query.weight_of(&segment.space)).collect();
        let vector = reweight(&Vector::concatenate(segments.iter()), &lengths, &weights)?;
        debug!(schema = %query.schema, dim = vector.dim(), "query vector assembled");
        Ok(vector)
    }

    /// Per-space segments of the looks-like entity's index vector, scaled
    /// back up by `sqrt(|parents|)`, the constant the index divided by.
    async fn looks_like_segments(&self, query: &QueryDescriptor, branch: NodeIndex) -> Result<Option<(Vec<Vector>, f32)>> {
        let Some(looks_like) = &query.looks_like else {
            return Ok(None);
        };
        let index = self.dag.node(self.dag.index_node());
        let entity = EntityId::new(looks_like.object_id.clone(), query.schema.clone());
        let stored = self
            .storage
            .read_vector(&NodeResultKey::new(entity.clone(), index.id()))
            .await?
            .ok_or_else(|| Error::InvalidInput(format!("no stored vector for {}", entity)))?;
        let denormalizer = (self.dag.node(branch).parents().len() as f32).sqrt();
        let segments = stored
            .split(&self.dag.segment_lengths(branch))?
            .iter()
            .map(|segment| segment * denormalizer)
            .collect();
        Ok(Some((segments, looks_like.weight)))
    }

    async fn segment(
        &self,
        query: &QueryDescriptor,
        space: &Space,
        segment: &SpaceSegment,
        stored: Option<(&Vector, f32)>,
        context: &ExecutionContext,
    ) -> Result<Vector> {
        let clauses: Vec<_> = query.similar_for(&space.name).collect();
        let values: Vec<_> = clauses.iter().map(|c| Some(c.value.clone())).collect();
        let embedded = if values.is_empty() {
            Vec::new()
        } else {
            space
                .transform
                .embed_values(&values, context, &self.models, self.storage.retry_policy())
                .await?
        };

        let mut items: Vec<(&Vector, f32)> = embedded.iter().zip(clauses.iter().map(|c| c.weight)).collect();
        items.extend(stored);
        for (vector, _) in &items {
            if vector.dim() != segment.length {
                return Err(Error::InvalidDimension {
                    expected: segment.length,
                    actual: vector.dim(),
                });
            }
        }
        if items.is_empty() {
            return Ok(match &space.transform {
                EmbeddingTransform::Recency(recency) => recency.embed(context.now(), context),
                transform => transform.default_vector(context),
            });
        }
        aggregate_weighted(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{product, shop, NOW};
    use linkvec_core::{EntitySchema, FieldType, FieldValue, RetryPolicy, SchemaField};
    use linkvec_dag::IndexDefinition;
    use linkvec_embedding::{ModelEmbeddingConfig, NumberEmbedding, NumberEmbeddingConfig, NumberMode};
    use linkvec_online::OnlineDagEvaluator;

    fn query_ctx() -> ExecutionContext {
        ExecutionContext::query(NOW)
    }

    #[test]
    fn test_branch_selection() {
        let (factory, _) = shop();
        let branch = factory.branch("product").unwrap();
        assert!(matches!(factory.dag().node(branch).kind(), NodeKind::Concatenation { .. }));
        assert!(matches!(factory.branch("purchase"), Err(Error::QueryBranch(_))));
        assert!(matches!(factory.branch("order"), Err(Error::UnknownSchema(_))));
    }

    #[test]
    fn test_schema_without_spaces_has_no_branch() {
        let text = EmbeddingTransform::Model(ModelEmbeddingConfig::text("hash", 4).unwrap());
        let dag = IndexDefinition::new("catalog")
            .schema(EntitySchema::entity("product", "id").field("title", FieldType::String))
            .schema(EntitySchema::entity("tag", "id").field("label", FieldType::String))
            .space(Space::new("title", text).with_field(SchemaField::new("product", "title", FieldType::String)))
            .build()
            .unwrap();
        let factory = QueryVectorFactory::new(
            Arc::new(dag),
            StorageManager::new(Arc::new(linkvec_storage::InMemoryStore::new()), RetryPolicy::none()),
            ModelRegistry::new(),
        );
        assert!(matches!(factory.branch("tag"), Err(Error::QueryBranch(_))));
    }

    #[tokio::test]
    async fn test_number_preference_and_weights() {
        let (factory, _) = shop();
        let query = QueryDescriptor::new("product")
            .space_weight("rating", 2.0)
            .space_weight("description", 0.0);
        let vector = factory.query_vector(&query, &query_ctx()).await.unwrap();
        assert_eq!(vector.dim(), 11);
        // maximum mode prefers the top of the range
        assert_eq!(&vector.as_slice()[..2], &[2.0, 0.0]);
        assert!(vector.as_slice()[3..].iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_similar_text_fills_its_segment() {
        let (factory, _) = shop();
        let query = QueryDescriptor::new("product")
            .space_weight("rating", 0.0)
            .similar("description", FieldValue::String("red shoes".into()), 1.0);
        let vector = factory.query_vector(&query, &query_ctx()).await.unwrap();
        let segments = vector.split(&[3, 8]).unwrap();
        assert!((segments[1].norm() - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_looks_like_restores_stored_segments() {
        let (factory, evaluator) = shop();
        let ctx = ExecutionContext::ingestion(NOW);
        let report = evaluator.ingest(vec![product("p1", 4, "leather boots")], &ctx).await;
        let stored = report.results[0].main.value.as_vector().unwrap().clone();

        let query = QueryDescriptor::new("product").with_vector("p1");
        let vector = factory.query_vector(&query, &query_ctx()).await.unwrap();
        let scale = 2f32.sqrt();
        let description_q = vector.split(&[3, 8]).unwrap().remove(1);
        let description_s = stored.split(&[3, 8]).unwrap().remove(1);
        for (q, s) in description_q.as_slice().iter().zip(description_s.as_slice()) {
            assert!((q - s * scale).abs() < 1e-4);
        }
    }

    #[tokio::test]
    async fn test_looks_like_with_empty_segment_keeps_scale() {
        let size = EmbeddingTransform::Number(
            NumberEmbedding::new(NumberEmbeddingConfig::new(0.0, 10.0, NumberMode::Similar).unwrap()).unwrap(),
        );
        let text = EmbeddingTransform::Model(ModelEmbeddingConfig::text("hash", 8).unwrap());
        let dag = IndexDefinition::new("shop")
            .schema(
                EntitySchema::entity("product", "id")
                    .nullable_field("size", FieldType::Float)
                    .field("description", FieldType::String),
            )
            .space(Space::new("size", size).with_field(SchemaField::new("product", "size", FieldType::Float).nullable()))
            .space(Space::new("description", text).with_field(SchemaField::new(
                "product",
                "description",
                FieldType::String,
            )))
            .build()
            .unwrap();
        let dag = Arc::new(dag);
        let storage = StorageManager::new(Arc::new(linkvec_storage::InMemoryStore::new()), RetryPolicy::none());
        let models = crate::test_support::models();
        let evaluator = OnlineDagEvaluator::new(dag.clone(), storage.clone(), models.clone());
        let factory = QueryVectorFactory::new(dag, storage, models);

        let entity = linkvec_core::ParsedEntity::reference(EntityId::new("p1", "product"))
            .with_field("description", FieldValue::String("wool scarf".into()));
        let report = evaluator.ingest(vec![entity], &ExecutionContext::ingestion(NOW)).await;
        assert!(report.is_success());

        let query = QueryDescriptor::new("product").with_vector("p1").space_weight("size", 0.0);
        let vector = factory.query_vector(&query, &query_ctx()).await.unwrap();
        let segments = vector.split(&[3, 8]).unwrap();
        assert!(segments[0].as_slice().iter().all(|x| *x == 0.0));
        assert!((segments[1].norm() - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_unknown_looks_like_entity() {
        let (factory, _) = shop();
        let query = QueryDescriptor::new("product").with_vector("missing");
        let err = factory.query_vector(&query, &query_ctx()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_requires_query_context() {
        let (factory, _) = shop();
        let query = QueryDescriptor::new("product");
        assert!(factory.query_vector(&query, &ExecutionContext::ingestion(NOW)).await.is_err());
        let unknown_space = QueryDescriptor::new("product").space_weight("color", 1.0);
        assert!(matches!(
            factory.query_vector(&unknown_space, &query_ctx()).await,
            Err(Error::UnknownSpace(_))
        ));
    }
}
