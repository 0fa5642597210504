//! # linkvec
//!
//! An incremental embedding engine for structured entities.
//!
//! Entities are declared with schemas, and every vector space applies one
//! embedding transform to one field per entity type. The index definition
//! compiles into a content-addressed computation graph; entity updates and
//! events are evaluated against it online, and query vectors are assembled
//! with the same layout for nearest-neighbor search.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use linkvec::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> linkvec::Result<()> {
//! let rating = EmbeddingTransform::Number(NumberEmbedding::new(
//!     NumberEmbeddingConfig::new(1.0, 5.0, NumberMode::Maximum)?,
//! )?);
//! let definition = IndexDefinition::new("catalog")
//!     .schema(EntitySchema::entity("product", "id").field("rating", FieldType::Integer))
//!     .space(Space::new("rating", rating).with_field(SchemaField::new("product", "rating", FieldType::Integer)));
//!
//! let engine = Engine::builder(definition, Arc::new(InMemoryStore::new())).build()?;
//! let now = linkvec::unix_now();
//! engine
//!     .ingest_json("product", &[serde_json::json!({"id": "a", "rating": 5})], &ExecutionContext::ingestion(now))
//!     .await?;
//! let hits = engine.search(&QueryDescriptor::new("product").limit(3), &ExecutionContext::query(now)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Structure
//!
//! - [`linkvec-core`](https://docs.rs/linkvec-core) - Schemas, vectors, values, errors, aggregation
//! - [`linkvec-embedding`](https://docs.rs/linkvec-embedding) - Number, categorical, recency and model transforms
//! - [`linkvec-dag`](https://docs.rs/linkvec-dag) - Node graph, projections, index definitions
//! - [`linkvec-storage`](https://docs.rs/linkvec-storage) - Storage trait, in-memory and LMDB stores
//! - [`linkvec-online`](https://docs.rs/linkvec-online) - Incremental evaluation and event aggregation
//! - [`linkvec-query`](https://docs.rs/linkvec-query) - Query vectors and knn execution

use std::sync::Arc;

// Re-export core types
pub use linkvec_core::{
    unix_now, ComparisonFilter, EngineConfig, EntityId, EntitySchema, Error, ErrorKind, EvaluationResult,
    ExecutionContext, FieldType, FieldValue, ParsedEntity, Result, RetryPolicy, SchemaField, Vector,
};

pub use linkvec_dag::{Dag, DagEffect, EffectModifier, IndexDefinition, SchemaReference, Space};
pub use linkvec_embedding::{
    BatchingModelProvider, CategoricalEmbedding, CategoricalEmbeddingConfig, ChunkingConfig, CustomEmbedding,
    EmbeddingTransform, HashingModelProvider, ModelEmbeddingConfig, ModelProvider, ModelRegistry,
    NumberEmbedding, NumberEmbeddingConfig, NumberMode, PeriodTime, RecencyEmbedding, RecencyEmbeddingConfig,
};
pub use linkvec_online::{BatchReport, OnlineDagEvaluator};
pub use linkvec_query::{NlqParamFiller, QueryDescriptor, QueryExecutor, QueryResult};
pub use linkvec_storage::{InMemoryStore, LmdbStore, NodeResultStore, SearchHit, StorageManager};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        ComparisonFilter, DagEffect, EffectModifier, EmbeddingTransform, Engine, EngineConfig, EntityId,
        EntitySchema, Error, ExecutionContext, FieldType, FieldValue, HashingModelProvider, IndexDefinition,
        InMemoryStore, ModelEmbeddingConfig, NumberEmbedding, NumberEmbeddingConfig, NumberMode, ParsedEntity,
        QueryDescriptor, Result, SchemaField, SchemaReference, Space, Vector,
    };
}

/// Install a fmt subscriber filtered by `RUST_LOG`, `info` by default.
pub fn init_tracing() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Builds an [`Engine`] from an index definition and a store.
pub struct EngineBuilder {
    definition: IndexDefinition,
    store: Arc<dyn NodeResultStore>,
    config: EngineConfig,
    models: Vec<(String, Arc<dyn ModelProvider>)>,
    nlq: Option<Arc<dyn NlqParamFiller>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a model provider; calls to it are micro-batched.
    #[must_use]
    pub fn model(mut self, name: impl Into<String>, provider: Arc<dyn ModelProvider>) -> Self {
        self.models.push((name.into(), provider));
        self
    }

    #[must_use]
    pub fn nlq(mut self, filler: Arc<dyn NlqParamFiller>) -> Self {
        self.nlq = Some(filler);
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;
        let dag = Arc::new(self.definition.build()?);
        let storage = StorageManager::new(self.store, self.config.retry.clone());
        let models = self.models.into_iter().fold(ModelRegistry::new(), |registry, (name, provider)| {
            let batched: Arc<dyn ModelProvider> =
                Arc::new(BatchingModelProvider::new(provider, self.config.batching.clone()));
            registry.with_provider(name, batched)
        });
        let mut executor = QueryExecutor::new(dag.clone(), storage.clone(), models.clone());
        if let Some(filler) = self.nlq {
            executor = executor.with_nlq(filler);
        }
        tracing::info!(
            index = dag.index_name(),
            nodes = dag.nodes().len(),
            spaces = dag.spaces().len(),
            "engine ready"
        );
        Ok(Engine {
            evaluator: OnlineDagEvaluator::new(dag, storage, models),
            executor,
        })
    }
}

/// Evaluator and query executor sharing one graph and one store.
pub struct Engine {
    evaluator: OnlineDagEvaluator,
    executor: QueryExecutor,
}

impl Engine {
    pub fn builder(definition: IndexDefinition, store: Arc<dyn NodeResultStore>) -> EngineBuilder {
        EngineBuilder {
            definition,
            store,
            config: EngineConfig::default(),
            models: Vec::new(),
            nlq: None,
        }
    }

    #[inline]
    pub fn dag(&self) -> &Arc<Dag> {
        self.evaluator.dag()
    }

    #[inline]
    pub fn storage(&self) -> &StorageManager {
        self.evaluator.storage()
    }

    #[inline]
    pub fn evaluator(&self) -> &OnlineDagEvaluator {
        &self.evaluator
    }

    pub async fn ingest(&self, records: Vec<ParsedEntity>, context: &ExecutionContext) -> BatchReport {
        self.evaluator.ingest(records, context).await
    }

    pub async fn ingest_json(
        &self,
        schema: &str,
        payloads: &[serde_json::Value],
        context: &ExecutionContext,
    ) -> Result<BatchReport> {
        self.evaluator.ingest_json(schema, payloads, context).await
    }

    pub async fn query_vector(&self, query: &QueryDescriptor, context: &ExecutionContext) -> Result<Vector> {
        let resolved = self.executor.resolve(query).await?;
        self.executor.factory().query_vector(&resolved, context).await
    }

    pub async fn search(&self, query: &QueryDescriptor, context: &ExecutionContext) -> Result<Vec<SearchHit>> {
        Ok(self.executor.search(query, context).await?.hits)
    }
}
