//! Spaces and index definitions
//!
//! An [`IndexDefinition`] lists the spaces of an index and the effects that
//! update it. [`IndexDefinition::build`] turns it into a [`Dag`]:
//!
//! 1. per space and entity type, a field node feeding an embedding node
//!    (through a chunking node for chunked text spaces),
//! 2. per effect and space, filter nodes and an event aggregation node,
//! 3. an aggregation node wherever an entity type's space has effects,
//! 4. one concatenation node per entity type, in space order,
//! 5. the index node.

use crate::builder::DagBuilder;
use crate::dag::Dag;
use crate::effect::DagEffect;
use crate::node::{NodeIndex, NodeKind, SpaceSegment};
use linkvec_core::{EntitySchema, Error, FieldType, Result, SchemaField};
use linkvec_embedding::{ChunkingConfig, EmbeddingTransform};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// A vector space: one transform applied to one field per entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub name: String,
    pub transform: EmbeddingTransform,
    pub fields: Vec<SchemaField>,
    #[serde(default)]
    pub chunking: Option<ChunkingConfig>,
}

impl Space {
    #[must_use]
    pub fn new(name: impl Into<String>, transform: EmbeddingTransform) -> Self {
        Self {
            name: name.into(),
            transform,
            fields: Vec::new(),
            chunking: None,
        }
    }

    #[must_use]
    pub fn with_field(mut self, field: SchemaField) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn with_chunking(mut self, config: ChunkingConfig) -> Self {
        self.chunking = Some(config);
        self
    }

    #[inline]
    #[must_use]
    pub fn length(&self) -> usize {
        self.transform.length()
    }

    #[must_use]
    pub fn field_for(&self, schema: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.schema == schema)
    }

    fn accepts(&self, field_type: &FieldType) -> bool {
        match &self.transform {
            EmbeddingTransform::Number(_) => matches!(field_type, FieldType::Integer | FieldType::Float),
            EmbeddingTransform::Categorical(_) => matches!(field_type, FieldType::String | FieldType::StringList),
            EmbeddingTransform::Recency(_) => matches!(field_type, FieldType::Timestamp | FieldType::Integer),
            EmbeddingTransform::Model(_) => {
                matches!(field_type, FieldType::String | FieldType::StringList | FieldType::Blob)
            }
            EmbeddingTransform::Custom(_) => matches!(field_type, FieldType::FloatList),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("space name cannot be empty".into()));
        }
        if self.fields.is_empty() {
            return Err(Error::InvalidConfig(format!("space {} has no fields", self.name)));
        }
        let mut schemas = HashSet::new();
        for field in &self.fields {
            if !schemas.insert(field.schema.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "space {} binds two fields of {}",
                    self.name, field.schema
                )));
            }
        }
        if let Some(config) = &self.chunking {
            config.validate()?;
            if !self.transform.is_model_backed() {
                return Err(Error::InvalidConfig(format!(
                    "space {} chunks a {} field",
                    self.name,
                    self.transform.kind_name()
                )));
            }
        }
        Ok(())
    }
}

/// Declarative index: its entity types, spaces and effects.
#[derive(Debug, Clone, Default)]
pub struct IndexDefinition {
    name: String,
    schemas: Vec<EntitySchema>,
    spaces: Vec<Space>,
    effects: Vec<DagEffect>,
}

impl IndexDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn schema(mut self, schema: EntitySchema) -> Self {
        self.schemas.push(schema);
        self
    }

    #[must_use]
    pub fn space(mut self, space: Space) -> Self {
        self.spaces.push(space);
        self
    }

    #[must_use]
    pub fn effect(mut self, effect: DagEffect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn build(self) -> Result<Dag> {
        if self.spaces.is_empty() {
            return Err(Error::InvalidConfig(format!("index {} has no spaces", self.name)));
        }
        let mut builder = DagBuilder::new();
        for schema in self.schemas {
            builder.add_schema(schema)?;
        }
        let mut names = HashSet::new();
        for space in &self.spaces {
            space.validate()?;
            if !names.insert(space.name.as_str()) {
                return Err(Error::InvalidConfig(format!("space {} declared twice", space.name)));
            }
        }
        let layout: Vec<SpaceSegment> = self
            .spaces
            .iter()
            .map(|s| SpaceSegment {
                space: s.name.clone(),
                length: s.length(),
            })
            .collect();

        // (space, schema) -> embedding node
        let mut embeddings: BTreeMap<(String, String), NodeIndex> = BTreeMap::new();
        for space in &self.spaces {
            for bound in &space.fields {
                let schema = builder.schema(&bound.schema)?;
                if schema.is_event() {
                    return Err(Error::InvalidConfig(format!(
                        "space {} binds event field {}.{}",
                        space.name, bound.schema, bound.name
                    )));
                }
                let field = schema.get_field(&bound.name)?.clone();
                if !space.accepts(&field.field_type) {
                    return Err(Error::InvalidConfig(format!(
                        "{} space {} cannot embed {}.{} of type {:?}",
                        space.transform.kind_name(),
                        space.name,
                        field.schema,
                        field.name,
                        field.field_type
                    )));
                }
                let schema_name = field.schema.clone();
                let mut input = builder.create_node(NodeKind::SchemaField { field }, &[])?;
                if let Some(config) = space.chunking {
                    input = builder.create_node(NodeKind::Chunking { config }, &[input])?;
                }
                let embedding = builder.create_node(
                    NodeKind::Embedding {
                        space: space.name.clone(),
                        transform: space.transform.clone(),
                    },
                    &[input],
                )?;
                embeddings.insert((space.name.clone(), schema_name), embedding);
            }
        }

        // (space, affected schema) -> [(event aggregation node, multiplier)]
        let mut event_aggregations: BTreeMap<(String, String), Vec<(NodeIndex, f32)>> = BTreeMap::new();
        for effect in self.effects {
            builder.register_effect(effect.clone())?;
            let event_schema = builder.schema(&effect.event_schema)?.clone();
            let mut touched = false;
            for space in &self.spaces {
                let affecting = match embeddings.get(&(space.name.clone(), effect.affecting.schema.clone())) {
                    Some(&node) => node,
                    None => continue,
                };
                let mut parents = vec![affecting];
                for weighted in &effect.filters {
                    let field = event_schema.get_field(&weighted.filter.field)?.clone();
                    let field_node = builder.create_node(NodeKind::SchemaField { field }, &[])?;
                    parents.push(builder.create_node(
                        NodeKind::ComparisonFilter {
                            filter: weighted.filter.clone(),
                        },
                        &[field_node],
                    )?);
                }
                let node = builder.create_node(
                    NodeKind::EventAggregation {
                        space: space.name.clone(),
                        transform: space.transform.clone(),
                        effect: effect.clone(),
                    },
                    &parents,
                )?;
                event_aggregations
                    .entry((space.name.clone(), effect.affected.schema.clone()))
                    .or_default()
                    .push((node, effect.multiplier));
                touched = true;
            }
            if !touched {
                return Err(Error::InvalidConfig(format!(
                    "effect on {}: no space embeds {}",
                    effect.event_schema, effect.affecting.schema
                )));
            }
        }

        let entity_schemas: Vec<String> = builder_entity_schemas(&builder, &embeddings, &event_aggregations);
        let mut concatenations = Vec::new();
        for schema in &entity_schemas {
            let mut parents = Vec::new();
            for space in &self.spaces {
                let key = (space.name.clone(), schema.clone());
                let own = embeddings.get(&key).copied();
                let node = match (own, event_aggregations.get(&key)) {
                    (own, Some(aggregations)) => {
                        let mut agg_parents: Vec<NodeIndex> = own.into_iter().collect();
                        let mut weights: Vec<f32> = own.map(|_| 1.0).into_iter().collect();
                        for &(node, multiplier) in aggregations {
                            agg_parents.push(node);
                            weights.push(multiplier);
                        }
                        builder.create_node(
                            NodeKind::Aggregation {
                                space: space.name.clone(),
                                transform: space.transform.clone(),
                                weights,
                            },
                            &agg_parents,
                        )?
                    }
                    (Some(embedding), None) => embedding,
                    (None, None) => continue,
                };
                parents.push(node);
            }
            debug!(schema = %schema, spaces = parents.len(), "concatenating schema");
            concatenations.push(builder.create_node(
                NodeKind::Concatenation { layout: layout.clone() },
                &parents,
            )?);
        }
        builder.create_node(NodeKind::Index { name: self.name }, &concatenations)?;
        for space in self.spaces {
            builder.add_space(space);
        }
        builder.build()
    }
}

/// Entity types with at least one space input, in name order.
fn builder_entity_schemas(
    builder: &DagBuilder,
    embeddings: &BTreeMap<(String, String), NodeIndex>,
    event_aggregations: &BTreeMap<(String, String), Vec<(NodeIndex, f32)>>,
) -> Vec<String> {
    let mut schemas: Vec<String> = embeddings
        .keys()
        .chain(event_aggregations.keys())
        .map(|(_, schema)| schema.clone())
        .filter(|schema| builder.schema(schema).is_ok_and(|s| !s.is_event()))
        .collect();
    schemas.sort();
    schemas.dedup();
    schemas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::SchemaReference;
    use crate::test_support::{purchase_index, rating_space};
    use linkvec_embedding::{ModelEmbeddingConfig, NumberEmbedding, NumberEmbeddingConfig, NumberMode};

    #[test]
    fn test_index_layout_is_shared() {
        let dag = purchase_index();
        let index = dag.node(dag.index_node());
        assert_eq!(index.parents().len(), 2);
        let lengths: Vec<usize> = index.parents().iter().map(|&p| dag.node(p).length()).collect();
        assert_eq!(lengths[0], lengths[1]);
        assert_eq!(index.length(), lengths[0]);
        assert_eq!(dag.indexed_schemas(), vec!["product", "user"]);
    }

    #[test]
    fn test_aggregation_weights_follow_multiplier() {
        let dag = purchase_index();
        let aggregation = dag
            .nodes()
            .iter()
            .find(|n| matches!(n.kind(), NodeKind::Aggregation { .. }) && n.has_schema("user"))
            .unwrap();
        match aggregation.kind() {
            NodeKind::Aggregation { weights, .. } => assert_eq!(weights, &vec![2.0]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_building_twice_gives_same_ids() {
        let a = purchase_index();
        let b = purchase_index();
        assert_eq!(a.node(a.index_node()).id(), b.node(b.index_node()).id());
    }

    #[test]
    fn test_space_rejects_wrong_field_type() {
        let product = EntitySchema::entity("product", "id").field("title", FieldType::String);
        let number = EmbeddingTransform::Number(
            NumberEmbedding::new(NumberEmbeddingConfig::new(0.0, 1.0, NumberMode::Similar).unwrap()).unwrap(),
        );
        let result = IndexDefinition::new("idx")
            .schema(product)
            .space(Space::new("n", number).with_field(SchemaField::new("product", "title", FieldType::String)))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_custom_space_takes_float_lists() {
        let custom = || EmbeddingTransform::Custom(linkvec_embedding::CustomEmbedding::new(4).unwrap());
        let product = EntitySchema::entity("product", "id")
            .field("features", FieldType::FloatList)
            .field("title", FieldType::String);
        let dag = IndexDefinition::new("idx")
            .schema(product.clone())
            .space(Space::new("f", custom()).with_field(SchemaField::new("product", "features", FieldType::FloatList)))
            .build()
            .unwrap();
        assert_eq!(dag.space("f").unwrap().transform.length(), 4);

        let result = IndexDefinition::new("idx")
            .schema(product)
            .space(Space::new("f", custom()).with_field(SchemaField::new("product", "title", FieldType::String)))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_chunking_requires_model_space() {
        let space = rating_space().with_chunking(ChunkingConfig::default());
        assert!(space.validate().is_err());
        let text = Space::new("text", EmbeddingTransform::Model(ModelEmbeddingConfig::text("m", 4).unwrap()))
            .with_field(SchemaField::new("product", "description", FieldType::String))
            .with_chunking(ChunkingConfig::default());
        assert!(text.validate().is_ok());
    }

    #[test]
    fn test_effect_without_space_is_rejected() {
        let result = IndexDefinition::new("idx")
            .schema(EntitySchema::entity("user", "id").field("age", FieldType::Integer))
            .schema(EntitySchema::entity("product", "id").field("rating", FieldType::Integer))
            .schema(
                EntitySchema::event("view", "id", "ts")
                    .reference("user", "user")
                    .reference("product", "product"),
            )
            .space(rating_space())
            .effect(DagEffect::new(
                "view",
                SchemaReference::new("product", "product"),
                SchemaReference::new("user", "user"),
            ))
            .build();
        assert!(result.is_err());
    }
}
