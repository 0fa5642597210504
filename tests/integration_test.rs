// Integration tests for linkvec
use linkvec::prelude::*;
use linkvec::{BatchReport, LmdbStore, NodeResultStore};
use linkvec_dag::NodeKind;
use serde_json::json;
use std::sync::Arc;

const NOW: i64 = 1_700_000_000;

fn rating_space() -> Space {
    let rating = EmbeddingTransform::Number(
        NumberEmbedding::new(NumberEmbeddingConfig::new(1.0, 5.0, NumberMode::Maximum).unwrap()).unwrap(),
    );
    Space::new("rating", rating).with_field(SchemaField::new("product", "rating", FieldType::Integer))
}

fn text_space() -> Space {
    Space::new(
        "text",
        EmbeddingTransform::Model(ModelEmbeddingConfig::text("hash", 16).unwrap()),
    )
    .with_field(SchemaField::new("product", "text", FieldType::String))
}

fn catalog(modifier: EffectModifier) -> IndexDefinition {
    IndexDefinition::new("catalog")
        .schema(
            EntitySchema::entity("product", "id")
                .field("rating", FieldType::Integer)
                .field("text", FieldType::String),
        )
        .schema(EntitySchema::entity("user", "id"))
        .schema(
            EntitySchema::event("like", "id", "created_at")
                .reference("user", "user")
                .reference("product", "product"),
        )
        .space(rating_space())
        .space(text_space())
        .effect(
            DagEffect::new(
                "like",
                SchemaReference::new("user", "user"),
                SchemaReference::new("product", "product"),
            )
            .with_modifier(modifier),
        )
}

fn engine_with(store: Arc<dyn NodeResultStore>, modifier: EffectModifier) -> Engine {
    Engine::builder(catalog(modifier), store)
        .model("hash", Arc::new(HashingModelProvider::new(16)))
        .build()
        .unwrap()
}

fn engine() -> Engine {
    engine_with(Arc::new(InMemoryStore::new()), EffectModifier::default())
}

fn like(id: &str, user: &str, product: &str, ts: i64) -> ParsedEntity {
    ParsedEntity::reference(EntityId::new(id, "like"))
        .with_field("user", FieldValue::Reference(user.into()))
        .with_field("product", FieldValue::Reference(product.into()))
        .with_field("created_at", FieldValue::Timestamp(ts))
}

fn text_segment(vector: &Vector) -> Vector {
    vector.split(&[3, 16]).unwrap().remove(1)
}

async fn user_vector(engine: &Engine, report: &BatchReport) -> Vector {
    let result = report
        .results
        .iter()
        .rev()
        .find(|r| r.main.entity.schema == "user")
        .expect("user result");
    let vector = result.main.value.as_vector().unwrap().clone();
    let index = engine.dag().node(engine.dag().index_node()).id().to_string();
    let stored = engine
        .storage()
        .read_vector(&linkvec_core::NodeResultKey::new(result.main.entity.clone(), index))
        .await
        .unwrap();
    assert_eq!(stored.as_ref(), Some(&vector));
    vector
}

#[tokio::test]
async fn test_rating_maximum_ranks_higher_rating_first() {
    let engine = engine();
    let ctx = ExecutionContext::ingestion(NOW);
    let payloads = [
        json!({"id": "b", "rating": 1, "text": "x"}),
        json!({"id": "a", "rating": 5, "text": "x"}),
    ];
    let report = engine.ingest_json("product", &payloads, &ctx).await.unwrap();
    assert!(report.is_success());

    let query = QueryDescriptor::new("product").space_weight("rating", 1.0).space_weight("text", 0.0);
    let hits = engine.search(&query, &ExecutionContext::query(NOW)).await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.entity.object_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(hits[0].score > hits[1].score);
}

#[tokio::test]
async fn test_second_event_blends_into_history() {
    let engine = engine();
    let ctx = ExecutionContext::ingestion(NOW);
    engine
        .ingest_json(
            "product",
            &[
                json!({"id": "boots", "rating": 4, "text": "leather hiking boots"}),
                json!({"id": "socks", "rating": 2, "text": "thin cotton socks"}),
            ],
            &ctx,
        )
        .await
        .unwrap();

    let first = engine.ingest(vec![like("l1", "u1", "boots", NOW - 10)], &ctx).await;
    assert_eq!(first.events_applied, 1);
    let after_one = user_vector(&engine, &first).await;

    let second = engine.ingest(vec![like("l2", "u1", "socks", NOW)], &ctx).await;
    assert_eq!(second.events_applied, 1);
    let after_two = user_vector(&engine, &second).await;
    assert_ne!(after_one, after_two);

    // the blend keeps part of the first product
    let boots = engine
        .query_vector(
            &QueryDescriptor::new("product").with_vector("boots").space_weight("rating", 0.0),
            &ExecutionContext::query(NOW),
        )
        .await
        .unwrap();
    let boots_text = text_segment(&boots);
    assert!(text_segment(&after_two).dot(&boots_text) > 0.0);
    assert!(text_segment(&after_one).dot(&boots_text) > text_segment(&after_two).dot(&boots_text));
}

#[tokio::test]
async fn test_full_temperature_keeps_only_latest_event() {
    let modifier = EffectModifier {
        temperature: 1.0,
        ..EffectModifier::default()
    };
    let engine = engine_with(Arc::new(InMemoryStore::new()), modifier);
    let ctx = ExecutionContext::ingestion(NOW);
    engine
        .ingest_json(
            "product",
            &[
                json!({"id": "boots", "rating": 4, "text": "leather hiking boots"}),
                json!({"id": "socks", "rating": 2, "text": "thin cotton socks"}),
            ],
            &ctx,
        )
        .await
        .unwrap();

    let history = engine
        .ingest(vec![like("l1", "u1", "boots", NOW - 10), like("l2", "u1", "socks", NOW)], &ctx)
        .await;
    let fresh = engine.ingest(vec![like("l3", "u2", "socks", NOW)], &ctx).await;
    let u1 = user_vector(&engine, &history).await;
    let u2 = user_vector(&engine, &fresh).await;
    for (a, b) in u1.as_slice().iter().zip(u2.as_slice()) {
        assert!((a - b).abs() < 1e-5);
    }
}

#[tokio::test]
async fn test_partial_update_keeps_other_spaces() {
    let engine = engine();
    let ctx = ExecutionContext::ingestion(NOW);
    let first = engine
        .ingest_json("product", &[json!({"id": "p1", "rating": 2, "text": "garden hose"})], &ctx)
        .await
        .unwrap();
    let second = engine
        .ingest_json("product", &[json!({"id": "p1", "rating": 5})], &ctx)
        .await
        .unwrap();
    assert!(second.is_success());

    let before = first.results[0].main.value.as_vector().unwrap();
    let after = second.results[0].main.value.as_vector().unwrap();
    assert_ne!(before, after);
    for (a, b) in text_segment(before).as_slice().iter().zip(text_segment(after).as_slice()) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[tokio::test]
async fn test_event_filters_skip_unmatched_events() {
    let definition = IndexDefinition::new("catalog")
        .schema(EntitySchema::entity("product", "id").field("rating", FieldType::Integer))
        .schema(EntitySchema::entity("user", "id"))
        .schema(
            EntitySchema::event("review", "id", "created_at")
                .reference("user", "user")
                .reference("product", "product")
                .field("stars", FieldType::Integer),
        )
        .space(rating_space())
        .effect(
            DagEffect::new(
                "review",
                SchemaReference::new("user", "user"),
                SchemaReference::new("product", "product"),
            )
            .with_filter(
                ComparisonFilter::new(
                    "stars",
                    linkvec_core::ComparisonOperator::GreaterEqual,
                    FieldValue::Integer(4),
                ),
                1.0,
            ),
        );
    let engine = Engine::builder(definition, Arc::new(InMemoryStore::new())).build().unwrap();
    let ctx = ExecutionContext::ingestion(NOW);
    engine
        .ingest_json("product", &[json!({"id": "p1", "rating": 5})], &ctx)
        .await
        .unwrap();
    let report = engine
        .ingest_json(
            "review",
            &[
                json!({"id": "r1", "user": "u1", "product": "p1", "stars": 2, "created_at": NOW}),
                json!({"id": "r2", "user": "u1", "product": "p1", "stars": 5, "created_at": NOW}),
            ],
            &ctx,
        )
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.events_skipped, 1);
    assert_eq!(report.events_applied, 1);
}

#[tokio::test]
async fn test_lmdb_store_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let store = LmdbStore::with_map_size(dir.path(), 64 * 1024 * 1024).unwrap();
    let engine = engine_with(Arc::new(store), EffectModifier::default());
    let ctx = ExecutionContext::ingestion(NOW);
    let report = engine
        .ingest_json(
            "product",
            &[
                json!({"id": "a", "rating": 5, "text": "x"}),
                json!({"id": "b", "rating": 1, "text": "x"}),
            ],
            &ctx,
        )
        .await
        .unwrap();
    assert!(report.is_success());
    let events = engine.ingest(vec![like("l1", "u1", "a", NOW)], &ctx).await;
    assert_eq!(events.events_applied, 1);

    let dag = engine.dag();
    let aggregation = dag
        .nodes()
        .iter()
        .find(|n| matches!(n.kind(), NodeKind::EventAggregation { .. }))
        .unwrap();
    let key = linkvec_core::NodeResultKey::new(EntityId::new("u1", "user"), aggregation.id());
    let metadata = engine.storage().read_event_metadata(&key).await.unwrap();
    assert_eq!(metadata.effect_count, 1);

    let query = QueryDescriptor::new("product").space_weight("text", 0.0).limit(1);
    let hits = engine.search(&query, &ExecutionContext::query(NOW)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity, EntityId::new("a", "product"));
}

#[test]
fn test_engine_config_from_json() {
    let config = EngineConfig::from_json_str(r#"{"retry": {"max_attempts": 5}}"#).unwrap();
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.batching, Default::default());
    assert!(EngineConfig::from_json_str(r#"{"retry": {"max_attempts": 0}}"#).is_err());
}

#[test]
fn test_invalid_definition_fails_at_build() {
    let definition = IndexDefinition::new("broken").schema(EntitySchema::entity("product", "id"));
    let err = Engine::builder(definition, Arc::new(InMemoryStore::new())).build().err().unwrap();
    assert_eq!(err.kind(), linkvec::ErrorKind::Configuration);
}
