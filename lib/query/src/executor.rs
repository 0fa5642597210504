//! Query execution against stored index vectors

use crate::factory::QueryVectorFactory;
use crate::nlq::NlqParamFiller;
use crate::query::QueryDescriptor;
use linkvec_core::{EntityId, ExecutionContext, FieldValue, Result, Vector};
use linkvec_dag::Dag;
use linkvec_embedding::ModelRegistry;
use linkvec_storage::{KnnSearchParams, SearchHit, StorageManager, ORIGIN_ID_FIELD};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Extra candidates fetched per requested hit when chunk hits may collapse
/// onto the same entity.
const CHUNK_OVERFETCH: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub vector: Vector,
    pub hits: Vec<SearchHit>,
}

pub struct QueryExecutor {
    factory: QueryVectorFactory,
    nlq: Option<Arc<dyn NlqParamFiller>>,
}

impl QueryExecutor {
    pub fn new(dag: Arc<Dag>, storage: StorageManager, models: ModelRegistry) -> Self {
        Self {
            factory: QueryVectorFactory::new(dag, storage, models),
            nlq: None,
        }
    }

    #[must_use]
    pub fn with_nlq(mut self, filler: Arc<dyn NlqParamFiller>) -> Self {
        self.nlq = Some(filler);
        self
    }

    #[inline]
    pub fn factory(&self) -> &QueryVectorFactory {
        &self.factory
    }

    /// Parameters the natural-language text contributes, merged under the
    /// explicit ones.
    pub async fn resolve(&self, query: &QueryDescriptor) -> Result<QueryDescriptor> {
        let mut resolved = query.clone();
        if let (Some(text), Some(filler)) = (&query.natural_query, &self.nlq) {
            let dag = self.factory.dag();
            let schema = dag.schema(&query.schema)?;
            let filled = filler.fill_params(text, schema, dag.spaces()).await?;
            debug!(schema = %query.schema, filled_similar = filled.similar.len(), "natural query filled");
            resolved.merge_missing(filled);
        }
        Ok(resolved)
    }

    pub async fn search(&self, query: &QueryDescriptor, context: &ExecutionContext) -> Result<QueryResult> {
        let query = self.resolve(query).await?;
        let vector = self.factory.query_vector(&query, context).await?;

        let dag = self.factory.dag();
        let chunked = dag.spaces().iter().any(|space| space.chunking.is_some());
        let limit = query.effective_limit();
        let params = KnnSearchParams {
            index_id: dag.node(dag.index_node()).id().to_string(),
            schema: query.schema.clone(),
            vector: vector.clone(),
            filters: query.filters.clone(),
            limit: if chunked { limit.saturating_mul(CHUNK_OVERFETCH) } else { limit },
            radius: query.radius,
        };
        let mut hits = self.factory.storage().knn_search(&params).await?;
        if chunked {
            hits = self.collapse_chunks(hits).await?;
            hits.truncate(limit);
        }
        info!(schema = %query.schema, limit, hits = hits.len(), "query executed");
        Ok(QueryResult { vector, hits })
    }

    /// Replace chunk hits by their origin entity, keeping the best score.
    async fn collapse_chunks(&self, hits: Vec<SearchHit>) -> Result<Vec<SearchHit>> {
        let mut best: HashMap<EntityId, f32> = HashMap::with_capacity(hits.len());
        let mut order = Vec::new();
        for hit in hits {
            let fields = self.factory.storage().read_fields(&hit.entity).await?;
            let entity = match fields.get(ORIGIN_ID_FIELD) {
                Some(FieldValue::Reference(origin)) => EntityId::new(origin.clone(), hit.entity.schema.clone()),
                _ => hit.entity,
            };
            match best.get_mut(&entity) {
                Some(score) => *score = score.max(hit.score),
                None => {
                    best.insert(entity.clone(), hit.score);
                    order.push(entity);
                }
            }
        }
        let mut collapsed: Vec<SearchHit> = order
            .into_iter()
            .filter_map(|entity| best.get(&entity).map(|score| SearchHit { score: *score, entity }))
            .collect();
        collapsed.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.entity.cmp(&b.entity)));
        Ok(collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlq::TextSpaceFiller;
    use crate::test_support::{product, shop_with_chunking, shop, NOW};
    use linkvec_core::{ComparisonFilter, ParsedEntity};

    #[tokio::test]
    async fn test_rating_preference_ranks_results() {
        let (factory, evaluator) = shop();
        let ctx = ExecutionContext::ingestion(NOW);
        let report = evaluator
            .ingest(vec![product("a", 5, "plain shirt"), product("b", 1, "plain shirt")], &ctx)
            .await;
        assert!(report.is_success());

        let executor = QueryExecutor::new(factory.dag().clone(), factory.storage().clone(), evaluator_models());
        let query = QueryDescriptor::new("product").space_weight("description", 0.0);
        let result = executor.search(&query, &ExecutionContext::query(NOW)).await.unwrap();
        let ids: Vec<&str> = result.hits.iter().map(|h| h.entity.object_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_filters_and_limit() {
        let (factory, evaluator) = shop();
        let ctx = ExecutionContext::ingestion(NOW);
        evaluator
            .ingest(
                vec![product("a", 5, "red shirt"), product("b", 4, "blue shirt"), product("c", 3, "red hat")],
                &ctx,
            )
            .await;
        let executor = QueryExecutor::new(factory.dag().clone(), factory.storage().clone(), evaluator_models());
        let query = QueryDescriptor::new("product")
            .filter(ComparisonFilter::eq("rating", FieldValue::Integer(4)))
            .limit(5);
        let result = executor.search(&query, &ExecutionContext::query(NOW)).await.unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].entity.object_id, "b");

        let top = executor
            .search(&QueryDescriptor::new("product").limit(2), &ExecutionContext::query(NOW))
            .await
            .unwrap();
        assert_eq!(top.hits.len(), 2);
    }

    #[tokio::test]
    async fn test_chunk_hits_collapse_to_origin() {
        let (factory, evaluator) = shop_with_chunking();
        let ctx = ExecutionContext::ingestion(NOW);
        let text = "alpha beta gamma. delta epsilon zeta. eta theta iota.";
        let report = evaluator.ingest(vec![product("p1", 3, text)], &ctx).await;
        assert!(report.results[0].chunks.len() > 1);

        let executor = QueryExecutor::new(factory.dag().clone(), factory.storage().clone(), evaluator_models());
        let query = QueryDescriptor::new("product").similar("description", FieldValue::String("delta".into()), 1.0);
        let result = executor.search(&query, &ExecutionContext::query(NOW)).await.unwrap();
        assert_eq!(result.hits.len(), 1);
        assert_eq!(result.hits[0].entity, EntityId::new("p1", "product"));
    }

    #[tokio::test]
    async fn test_natural_query_fills_missing_params_only() {
        let (factory, evaluator) = shop();
        let ctx = ExecutionContext::ingestion(NOW);
        evaluator
            .ingest(vec![ParsedEntity::reference(EntityId::new("a", "product"))
                .with_field("rating", FieldValue::Integer(2))
                .with_field("description", FieldValue::String("wool socks".into()))], &ctx)
            .await;
        let executor = QueryExecutor::new(factory.dag().clone(), factory.storage().clone(), evaluator_models())
            .with_nlq(Arc::new(TextSpaceFiller));

        let explicit = FieldValue::String("leather boots".into());
        let query = QueryDescriptor::new("product")
            .similar("description", explicit.clone(), 1.0)
            .natural_query("wool socks");
        let resolved = executor.resolve(&query).await.unwrap();
        assert_eq!(resolved.similar.len(), 1);
        assert_eq!(resolved.similar[0].value, explicit);

        let open = executor.resolve(&QueryDescriptor::new("product").natural_query("wool socks")).await.unwrap();
        assert_eq!(open.similar.len(), 1);
        assert_eq!(open.similar[0].space, "description");
    }

    fn evaluator_models() -> ModelRegistry {
        crate::test_support::models()
    }
}
