//! Online evaluation of index vectors
//!
//! The evaluator walks a projected subgraph in evaluation order, one entity
//! at a time. Field leaves take the value carried by the update, falling
//! back to the stored field; persisted nodes whose inputs did not change
//! reuse their stored result, so an update of one field only recomputes
//! the spaces reading it.
//!
//! Events take a second path: the effect projection folds the affecting
//! entity's stored vector into the affected entity's event aggregation,
//! then the affected entity is re-evaluated so its index vector follows.

use crate::cache::EvaluationCache;
use crate::event::{update_metadata, EventAggregator};
use linkvec_core::aggregation::concatenate_weighted;
use linkvec_core::{
    EntityId, EntitySchema, Error, EvaluationResult, ExecutionContext, FieldValue, NodeResultKey, NodeValue,
    ParsedEntity, Result, SchemaField, SingleResult, Vector,
};
use linkvec_dag::{Dag, EffectId, Node, NodeIndex, NodeKind, SchemaReference};
use linkvec_embedding::ModelRegistry;
use linkvec_storage::{StorageManager, ORIGIN_ID_FIELD};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Output of one node for one entity.
#[derive(Debug, Clone, Default)]
struct NodeOutput {
    main: Option<NodeValue>,
    chunks: Vec<NodeValue>,
    /// Whether the value differs from what storage holds.
    changed: bool,
}

impl NodeOutput {
    fn computed(main: Option<NodeValue>, chunks: Vec<NodeValue>) -> Self {
        Self {
            main,
            chunks,
            changed: true,
        }
    }

    fn loaded(main: Option<NodeValue>, chunks: Vec<NodeValue>) -> Self {
        Self {
            main,
            chunks,
            changed: false,
        }
    }

    fn vector(&self) -> Option<&Vector> {
        self.main.as_ref().and_then(NodeValue::as_vector)
    }

    fn field(&self) -> Option<&FieldValue> {
        self.main.as_ref().and_then(NodeValue::as_field)
    }
}

/// Field values of the entity under evaluation, with stored values
/// loaded on first use.
struct FieldScope<'a> {
    entity: &'a ParsedEntity,
    stored: Option<HashMap<String, FieldValue>>,
}

impl<'a> FieldScope<'a> {
    fn new(entity: &'a ParsedEntity) -> Self {
        Self { entity, stored: None }
    }

    async fn stored(&mut self, storage: &StorageManager) -> Result<&HashMap<String, FieldValue>> {
        if self.stored.is_none() {
            self.stored = Some(storage.read_fields(&self.entity.id).await?);
        }
        Ok(self.stored.get_or_insert_with(HashMap::new))
    }

    async fn resolve(&mut self, field: &SchemaField, storage: &StorageManager) -> Result<NodeOutput> {
        if let Some(value) = self.entity.get(&field.name) {
            return Ok(NodeOutput::computed(Some(value.clone().into()), Vec::new()));
        }
        let entity = self.entity;
        match self.stored(storage).await?.get(&field.name) {
            Some(value) => Ok(NodeOutput::loaded(Some(value.clone().into()), Vec::new())),
            None if field.nullable => Ok(NodeOutput::loaded(None, Vec::new())),
            None => Err(Error::MissingField {
                schema: field.schema.clone(),
                field: field.name.clone(),
                object_id: entity.id.object_id.clone(),
            }),
        }
    }

    /// Stored fields overlaid with the update's fields.
    async fn merged(&mut self, storage: &StorageManager) -> Result<HashMap<String, FieldValue>> {
        let entity = self.entity;
        let mut fields = self.stored(storage).await?.clone();
        fields.extend(entity.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(fields)
    }
}

/// A record of a batch that could not be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    /// Entity id, or payload position for records that did not parse.
    pub target: String,
    pub error: Error,
}

/// Outcome of [`OnlineDagEvaluator::ingest`]. Records fail independently.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Index vectors computed for entities and for entities affected by events.
    pub results: Vec<EvaluationResult>,
    pub events_applied: usize,
    /// Events no effect applied to, e.g. because every filter rejected them.
    pub events_skipped: usize,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Incremental evaluator over one index graph.
#[derive(Clone)]
pub struct OnlineDagEvaluator {
    dag: Arc<Dag>,
    storage: StorageManager,
    models: ModelRegistry,
}

impl OnlineDagEvaluator {
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

    /// Apply entity updates and events in order.
    pub async fn ingest(&self, records: Vec<ParsedEntity>, context: &ExecutionContext) -> BatchReport {
        let cache = EvaluationCache::new();
        let mut report = BatchReport::default();
        let total = records.len();
        for record in records {
            let outcome = match self.dag.schema(&record.id.schema) {
                Ok(schema) if schema.is_event() => {
                    self.apply_event(&record, context, &cache).await.map(|results| {
                        if results.is_empty() {
                            report.events_skipped += 1;
                        } else {
                            report.events_applied += 1;
                        }
                        results
                    })
                }
                Ok(_) => self.update_entity(&record, context, &cache).await.map(|r| vec![r]),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(results) => report.results.extend(results),
                Err(error) => {
                    warn!(record = %record.id, error = %error, "record failed");
                    report.failures.push(BatchFailure {
                        target: record.id.to_string(),
                        error,
                    });
                }
            }
        }
        info!(
            records = total,
            results = report.results.len(),
            events_applied = report.events_applied,
            events_skipped = report.events_skipped,
            failures = report.failures.len(),
            cache_hits = cache.hits(),
            "batch evaluated"
        );
        report
    }

    /// Parse JSON payloads of one schema and ingest them. Payloads that do
    /// not parse are reported as failures.
    pub async fn ingest_json(
        &self,
        schema: &str,
        payloads: &[Value],
        context: &ExecutionContext,
    ) -> Result<BatchReport> {
        let schema: EntitySchema = self.dag.schema(schema)?.clone();
        let mut records = Vec::with_capacity(payloads.len());
        let mut failures = Vec::new();
        for (position, payload) in payloads.iter().enumerate() {
            match schema.parse_json(payload) {
                Ok(record) => records.push(record),
                Err(error) => failures.push(BatchFailure {
                    target: format!("{}[{}]", schema.name, position),
                    error,
                }),
            }
        }
        let mut report = self.ingest(records, context).await;
        failures.append(&mut report.failures);
        report.failures = failures;
        Ok(report)
    }

    /// Evaluate and persist one entity while holding its lock.
    pub async fn update_entity(
        &self,
        entity: &ParsedEntity,
        context: &ExecutionContext,
        cache: &EvaluationCache,
    ) -> Result<EvaluationResult> {
        let _guard = self.storage.lock_entity(&entity.id).await;
        self.evaluate_entity(entity, context, cache).await
    }

    /// Apply an event to every effect it triggers. Returns the re-evaluated
    /// affected entities; empty when no effect applied.
    pub async fn apply_event(
        &self,
        event: &ParsedEntity,
        context: &ExecutionContext,
        cache: &EvaluationCache,
    ) -> Result<Vec<EvaluationResult>> {
        let schema = self.dag.schema(&event.id.schema)?;
        let created_at_field = schema.created_at_field().ok_or_else(|| {
            Error::InvalidInput(format!("{} is not an event schema", schema.name))
        })?;
        let created_at = event
            .get(created_at_field)
            .and_then(FieldValue::as_timestamp)
            .ok_or_else(|| missing_field(event, created_at_field))?;

        let mut results = Vec::new();
        for effect_id in self.dag.effects_for_event(&schema.name) {
            let effect = self.dag.effect(effect_id)?;
            let affected = reference(event, &effect.affected)?;
            let affecting = reference(event, &effect.affecting)?;

            let _guard = self.storage.lock_entity(&affected).await;
            let applied = self
                .evaluate_effect(effect_id, event, &affected, &affecting, created_at, context, cache)
                .await?;
            if applied {
                let update = ParsedEntity::reference(affected);
                results.push(self.evaluate_entity(&update, context, cache).await?);
            }
        }
        Ok(results)
    }

    async fn evaluate_entity(
        &self,
        entity: &ParsedEntity,
        context: &ExecutionContext,
        cache: &EvaluationCache,
    ) -> Result<EvaluationResult> {
        let projection = self.dag.project_to_schema(&entity.id.schema)?;
        let mut scope = FieldScope::new(entity);
        let mut outputs: HashMap<NodeIndex, NodeOutput> = HashMap::with_capacity(projection.nodes().len());

        for &index in projection.nodes() {
            let node = self.dag.node(index);
            let parents = self.parent_outputs(projection.parents(index), &outputs);
            let output = match node.kind() {
                NodeKind::SchemaField { field } => scope.resolve(field, &self.storage).await?,
                _ if parents.is_empty() => {
                    let (main, chunks) = self.load(node, &entity.id, cache).await?;
                    NodeOutput::computed(main, chunks)
                }
                _ => self.evaluate_node(node, &parents, &entity.id, context, cache).await?,
            };
            debug!(
                node = node.id(),
                kind = node.kind().name(),
                entity = %entity.id,
                changed = output.changed,
                "evaluated node"
            );
            outputs.insert(index, output);
        }

        self.storage.write_fields(&entity.id, &entity.fields).await?;
        let index = self.dag.node(self.dag.index_node());
        let output = outputs
            .remove(&self.dag.index_node())
            .ok_or_else(|| Error::InvalidDagStructure("index node was not evaluated".into()))?;
        let main = output
            .main
            .ok_or_else(|| Error::InvalidDagStructure(format!("no index vector for {}", entity.id)))?;

        let mut chunks = Vec::with_capacity(output.chunks.len());
        if !output.chunks.is_empty() {
            let mut fields = scope.merged(&self.storage).await?;
            fields.insert(ORIGIN_ID_FIELD.to_string(), FieldValue::Reference(entity.id.object_id.clone()));
            for (i, value) in output.chunks.into_iter().enumerate() {
                let chunk = entity.id.chunk(i);
                self.storage.write_fields(&chunk, &fields).await?;
                chunks.push(SingleResult::new(index.id(), chunk, value));
            }
        }
        Ok(EvaluationResult::with_chunks(
            SingleResult::new(index.id(), entity.id.clone(), main),
            chunks,
        ))
    }

    fn parent_outputs<'o>(
        &self,
        parents: &[NodeIndex],
        outputs: &'o HashMap<NodeIndex, NodeOutput>,
    ) -> Vec<(&Node, &'o NodeOutput)> {
        parents
            .iter()
            .filter_map(|p| outputs.get(p).map(|output| (self.dag.node(*p), output)))
            .collect()
    }

    /// Reuse the stored result of a persisted node whose inputs did not
    /// change; otherwise compute and write through. A recomputed transient
    /// node is unchanged when none of its inputs changed.
    async fn evaluate_node(
        &self,
        node: &Node,
        parents: &[(&Node, &NodeOutput)],
        entity: &EntityId,
        context: &ExecutionContext,
        cache: &EvaluationCache,
    ) -> Result<NodeOutput> {
        if node.persist_evaluation_result() && parents.iter().all(|(_, p)| !p.changed) {
            let (main, chunks) = self.load(node, entity, cache).await?;
            if main.is_some() {
                return Ok(NodeOutput::loaded(main, chunks));
            }
        }
        let mut output = self.compute(node, parents, context).await?;
        if node.persist_evaluation_result() {
            self.persist(node, entity, &output, cache).await?;
        } else {
            output.changed = parents.iter().any(|(_, p)| p.changed);
        }
        Ok(output)
    }

    async fn compute(
        &self,
        node: &Node,
        parents: &[(&Node, &NodeOutput)],
        context: &ExecutionContext,
    ) -> Result<NodeOutput> {
        let first = parents
            .first()
            .map(|(_, output)| *output)
            .ok_or_else(|| Error::InvalidDagStructure(format!("{} node {} has no input", node.kind().name(), node.id())))?;

        match node.kind() {
            NodeKind::SchemaField { .. } | NodeKind::EventAggregation { .. } => Err(Error::InvalidDagStructure(
                format!("{} node {} is not computed from parents", node.kind().name(), node.id()),
            )),
            NodeKind::ComparisonFilter { filter } => Ok(NodeOutput::computed(
                Some(NodeValue::Bool(filter.matches(first.field()))),
                Vec::new(),
            )),
            NodeKind::Chunking { config } => {
                let chunks = first
                    .field()
                    .and_then(FieldValue::as_str)
                    .map(|text| config.chunk(text))
                    .unwrap_or_default()
                    .into_iter()
                    .map(|chunk| NodeValue::Field(FieldValue::String(chunk)))
                    .collect();
                Ok(NodeOutput::computed(first.main.clone(), chunks))
            }
            NodeKind::Embedding { transform, .. } => {
                let inputs: Vec<Option<FieldValue>> = std::iter::once(first.field().cloned())
                    .chain(first.chunks.iter().map(|c| c.as_field().cloned()))
                    .collect();
                let mut vectors = transform
                    .embed_values(&inputs, context, &self.models, self.storage.retry_policy())
                    .await?
                    .into_iter()
                    .map(NodeValue::Vector);
                let main = vectors.next();
                Ok(NodeOutput::computed(main, vectors.collect()))
            }
            NodeKind::Aggregation { transform, weights, .. } => {
                let aggregate = |replaced: Option<(usize, &Vector)>| -> Result<NodeValue> {
                    let items: Vec<(&Vector, f32)> = parents
                        .iter()
                        .zip(weights)
                        .enumerate()
                        .filter_map(|(i, ((_, output), weight))| match replaced {
                            Some((at, vector)) if at == i => Some((vector, *weight)),
                            _ => output.vector().map(|v| (v, *weight)),
                        })
                        .collect();
                    let vector = transform.aggregate(&items, context, true)?;
                    Ok(NodeValue::Vector(if vector.is_empty() {
                        transform.default_vector(context)
                    } else {
                        vector
                    }))
                };
                let main = aggregate(None)?;
                let chunks = match parents.iter().position(|(_, p)| !p.chunks.is_empty()) {
                    Some(at) => parents[at]
                        .1
                        .chunks
                        .iter()
                        .filter_map(NodeValue::as_vector)
                        .map(|chunk| aggregate(Some((at, chunk))))
                        .collect::<Result<Vec<_>>>()?,
                    None => Vec::new(),
                };
                Ok(NodeOutput::computed(Some(main), chunks))
            }
            NodeKind::Concatenation { layout } => {
                let segments: Vec<Vector> = layout
                    .iter()
                    .map(|segment| {
                        let parent = parents
                            .iter()
                            .find(|(n, _)| n.kind().space() == Some(segment.space.as_str()));
                        match parent {
                            Some((parent_node, output)) => output.vector().cloned().unwrap_or_else(|| {
                                parent_node
                                    .kind()
                                    .transform()
                                    .map_or_else(|| Vector::zeros(segment.length), |t| t.default_vector(context))
                            }),
                            None => Vector::zeros(segment.length),
                        }
                    })
                    .collect();
                // spaces without a parent for this schema stay zero and add nothing to the norm
                let weights: Vec<f32> = layout
                    .iter()
                    .map(|segment| {
                        let covered = parents
                            .iter()
                            .any(|(n, _)| n.kind().space() == Some(segment.space.as_str()));
                        if covered {
                            1.0
                        } else {
                            0.0
                        }
                    })
                    .collect();
                let join = |segments: &[Vector]| {
                    let parts: Vec<(&Vector, f32)> = segments.iter().zip(weights.iter().copied()).collect();
                    NodeValue::Vector(concatenate_weighted(&parts, true))
                };
                let main = join(segments.as_slice());

                let chunked = parents.iter().find(|(_, p)| !p.chunks.is_empty()).and_then(|(n, p)| {
                    let space = n.kind().space()?;
                    let slot = layout.iter().position(|s| s.space == space)?;
                    Some((slot, &p.chunks))
                });
                let chunks = match chunked {
                    Some((slot, chunk_values)) => chunk_values
                        .iter()
                        .filter_map(NodeValue::as_vector)
                        .map(|chunk| {
                            let mut with_chunk = segments.clone();
                            with_chunk[slot] = chunk.clone();
                            join(with_chunk.as_slice())
                        })
                        .collect(),
                    None => Vec::new(),
                };
                Ok(NodeOutput::computed(Some(main), chunks))
            }
            NodeKind::Index { .. } => Ok(NodeOutput::computed(first.main.clone(), first.chunks.clone())),
        }
    }

    /// Fold the event into every event aggregation of one effect. Returns
    /// false when the event's filters reject it.
    #[allow(clippy::too_many_arguments)]
    async fn evaluate_effect(
        &self,
        effect_id: EffectId,
        event: &ParsedEntity,
        affected: &EntityId,
        affecting: &EntityId,
        created_at: i64,
        context: &ExecutionContext,
        cache: &EvaluationCache,
    ) -> Result<bool> {
        let projection = self.dag.project_to_effect(effect_id)?;
        let mut outputs: HashMap<NodeIndex, NodeOutput> = HashMap::new();
        let mut applied = false;

        for &index in projection.nodes() {
            let node = self.dag.node(index);
            let parents = self.parent_outputs(projection.parents(index), &outputs);
            let output = match node.kind() {
                NodeKind::SchemaField { field } => match event.get(&field.name) {
                    Some(value) => NodeOutput::computed(Some(value.clone().into()), Vec::new()),
                    None if field.nullable => NodeOutput::computed(None, Vec::new()),
                    None => return Err(missing_field(event, &field.name)),
                },
                NodeKind::ComparisonFilter { .. } => self.compute(node, &parents, context).await?,
                NodeKind::EventAggregation { transform, effect, .. } => {
                    let affecting_vector = parents.first().and_then(|(_, p)| p.vector()).ok_or_else(|| {
                        Error::InvalidDagStructure(format!("event aggregation {} has no affecting input", node.id()))
                    })?;
                    let passing: Vec<f32> = effect
                        .filters
                        .iter()
                        .zip(parents.iter().skip(1))
                        .filter(|(_, (_, p))| p.main.as_ref().and_then(NodeValue::as_bool) == Some(true))
                        .map(|(weighted, _)| weighted.weight)
                        .collect();
                    let (weight, count) = match (effect.filters.is_empty(), passing.len()) {
                        (true, _) => (1.0, 1),
                        (false, 0) => {
                            debug!(node = node.id(), event = %event.id, "event rejected by filters");
                            outputs.insert(index, NodeOutput::default());
                            continue;
                        }
                        (false, n) => (passing.iter().sum::<f32>() / n as f32, n),
                    };

                    let key = NodeResultKey::new(affected.clone(), node.id());
                    let stored = self.load_main(&key, cache).await?;
                    let previous = self.storage.read_event_metadata(&key).await?;
                    let metadata = update_metadata(&previous, created_at, count as i64);
                    let vector = EventAggregator::new(transform, &effect.modifier).aggregate(
                        stored.as_ref().and_then(NodeValue::as_vector),
                        &metadata,
                        affecting_vector,
                        weight,
                        context,
                    )?;
                    let value = NodeValue::Vector(vector);
                    self.storage.write(&key, &value).await?;
                    cache.insert(key.clone(), Some(value.clone()));
                    self.storage.write_event_metadata(&key, &metadata).await?;
                    applied = true;
                    NodeOutput::computed(Some(value), Vec::new())
                }
                _ if parents.is_empty() => {
                    let key = NodeResultKey::new(affecting.clone(), node.id());
                    match self.load_main(&key, cache).await? {
                        Some(value) => NodeOutput::loaded(Some(value), Vec::new()),
                        None => {
                            return Err(Error::InvalidInput(format!(
                                "{} has no stored {} vector; ingest it before its events",
                                affecting,
                                node.kind().space().unwrap_or_default()
                            )))
                        }
                    }
                }
                other => {
                    return Err(Error::InvalidDagStructure(format!(
                        "unexpected {} node {} in effect projection",
                        other.name(),
                        node.id()
                    )))
                }
            };
            outputs.insert(index, output);
        }
        Ok(applied)
    }

    async fn load_main(&self, key: &NodeResultKey, cache: &EvaluationCache) -> Result<Option<NodeValue>> {
        if let Some(cached) = cache.get(key) {
            return Ok(cached);
        }
        let value = self.storage.read(key).await?;
        cache.insert(key.clone(), value.clone());
        Ok(value)
    }

    async fn load(
        &self,
        node: &Node,
        entity: &EntityId,
        cache: &EvaluationCache,
    ) -> Result<(Option<NodeValue>, Vec<NodeValue>)> {
        let main = self.load_main(&NodeResultKey::new(entity.clone(), node.id()), cache).await?;
        let mut chunks = Vec::new();
        if main.is_some() && self.is_chunked(node) {
            while let Some(chunk) = self
                .load_main(&NodeResultKey::new(entity.chunk(chunks.len()), node.id()), cache)
                .await?
            {
                chunks.push(chunk);
            }
        }
        Ok((main, chunks))
    }

    async fn persist(
        &self,
        node: &Node,
        entity: &EntityId,
        output: &NodeOutput,
        cache: &EvaluationCache,
    ) -> Result<()> {
        let Some(main) = &output.main else {
            return Ok(());
        };
        let keyed = std::iter::once((entity.clone(), main))
            .chain(output.chunks.iter().enumerate().map(|(i, c)| (entity.chunk(i), c)));
        for (owner, value) in keyed {
            let key = NodeResultKey::new(owner, node.id());
            self.storage.write(&key, value).await?;
            cache.insert(key, Some(value.clone()));
        }
        if self.is_chunked(node) {
            // chunks beyond the new count belong to an older text
            let mut stale = output.chunks.len();
            loop {
                let key = NodeResultKey::new(entity.chunk(stale), node.id());
                if self.load_main(&key, cache).await?.is_none() {
                    break;
                }
                self.storage.delete(&key).await?;
                cache.insert(key, None);
                stale += 1;
            }
        }
        Ok(())
    }

    fn is_chunked(&self, node: &Node) -> bool {
        node.parents().iter().any(|&p| {
            let parent = self.dag.node(p);
            matches!(parent.kind(), NodeKind::Chunking { .. }) || self.is_chunked(parent)
        })
    }
}

fn missing_field(record: &ParsedEntity, field: &str) -> Error {
    Error::MissingField {
        schema: record.id.schema.clone(),
        field: field.to_string(),
        object_id: record.id.object_id.clone(),
    }
}

fn reference(event: &ParsedEntity, reference: &SchemaReference) -> Result<EntityId> {
    event
        .get(&reference.field)
        .and_then(FieldValue::as_str)
        .map(|object_id| EntityId::new(object_id, reference.schema.clone()))
        .ok_or_else(|| missing_field(event, &reference.field))
}
