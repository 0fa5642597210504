//! # linkvec Query
//!
//! Query vectors and knn execution over an index built by `linkvec-dag`.
//!
//! A [`QueryDescriptor`] names the target entity type and carries per-space
//! weights, similar-to values, an optional looks-like entity, hard filters
//! and optional natural-language text. [`QueryVectorFactory`] turns it into
//! a vector with the layout of the type's index vectors;
//! [`QueryExecutor`] runs it against storage.

pub mod executor;
pub mod factory;
pub mod nlq;
pub mod query;

pub use executor::{QueryExecutor, QueryResult};
pub use factory::QueryVectorFactory;
pub use nlq::{NlqParamFiller, TextSpaceFiller};
pub use query::{LooksLike, QueryDescriptor, SimilarClause, DEFAULT_LIMIT, DEFAULT_SPACE_WEIGHT};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::QueryVectorFactory;
    use linkvec_core::{
        ComparisonFilter, EntityId, EntitySchema, FieldType, FieldValue, ParsedEntity, RetryPolicy, SchemaField,
    };
    use linkvec_dag::{DagEffect, IndexDefinition, SchemaReference, Space};
    use linkvec_embedding::{
        ChunkingConfig, EmbeddingTransform, HashingModelProvider, ModelEmbeddingConfig, ModelRegistry,
        NumberEmbedding, NumberEmbeddingConfig, NumberMode,
    };
    use linkvec_online::OnlineDagEvaluator;
    use linkvec_storage::{InMemoryStore, StorageManager};
    use std::sync::Arc;

    pub const NOW: i64 = 1_700_000_000;

    pub fn models() -> ModelRegistry {
        ModelRegistry::new().with_provider("hash", Arc::new(HashingModelProvider::new(8)))
    }

    fn build(chunking: Option<ChunkingConfig>) -> (QueryVectorFactory, OnlineDagEvaluator) {
        let rating = EmbeddingTransform::Number(
            NumberEmbedding::new(NumberEmbeddingConfig::new(1.0, 5.0, NumberMode::Maximum).unwrap()).unwrap(),
        );
        let mut description = Space::new(
            "description",
            EmbeddingTransform::Model(ModelEmbeddingConfig::text("hash", 8).unwrap()),
        )
        .with_field(SchemaField::new("product", "description", FieldType::String));
        if let Some(config) = chunking {
            description = description.with_chunking(config);
        }
        let dag = IndexDefinition::new("shop")
            .schema(
                EntitySchema::entity("product", "id")
                    .field("rating", FieldType::Integer)
                    .field("description", FieldType::String),
            )
            .schema(EntitySchema::entity("user", "id"))
            .schema(
                EntitySchema::event("purchase", "id", "created_at")
                    .reference("user", "user")
                    .reference("product", "product")
                    .field("channel", FieldType::String),
            )
            .space(Space::new("rating", rating).with_field(SchemaField::new("product", "rating", FieldType::Integer)))
            .space(description)
            .effect(
                DagEffect::new(
                    "purchase",
                    SchemaReference::new("user", "user"),
                    SchemaReference::new("product", "product"),
                )
                .with_filter(ComparisonFilter::eq("channel", FieldValue::String("web".into())), 1.0),
            )
            .build()
            .unwrap();
        let dag = Arc::new(dag);
        let storage = StorageManager::new(Arc::new(InMemoryStore::new()), RetryPolicy::none());
        (
            QueryVectorFactory::new(dag.clone(), storage.clone(), models()),
            OnlineDagEvaluator::new(dag, storage, models()),
        )
    }

    /// Products with a rating and a description; users follow purchases.
    pub fn shop() -> (QueryVectorFactory, OnlineDagEvaluator) {
        build(None)
    }

    pub fn shop_with_chunking() -> (QueryVectorFactory, OnlineDagEvaluator) {
        build(Some(ChunkingConfig::new(20, 0).unwrap()))
    }

    pub fn product(id: &str, rating: i64, description: &str) -> ParsedEntity {
        ParsedEntity::reference(EntityId::new(id, "product"))
            .with_field("rating", FieldValue::Integer(rating))
            .with_field("description", FieldValue::String(description.into()))
    }
}
