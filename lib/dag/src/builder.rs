//! Arena construction of the node graph.

use crate::dag::Dag;
use crate::effect::{DagEffect, EffectId};
use crate::index::Space;
use crate::node::{node_id, Node, NodeIndex, NodeKind};
use linkvec_core::{EntitySchema, Error, FieldType, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Collects schemas, effects and nodes, then freezes them into a [`Dag`].
///
/// Nodes are content-addressed: creating a node whose kind and parents
/// match an existing one returns the existing handle.
#[derive(Debug, Default)]
pub struct DagBuilder {
    nodes: Vec<Node>,
    by_id: HashMap<String, NodeIndex>,
    schemas: BTreeMap<String, EntitySchema>,
    effects: Vec<DagEffect>,
    spaces: Vec<Space>,
}

impl DagBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_schema(&mut self, schema: EntitySchema) -> Result<()> {
        schema.validate()?;
        if self.schemas.contains_key(&schema.name) {
            return Err(Error::InvalidConfig(format!("schema {} declared twice", schema.name)));
        }
        self.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    pub fn schema(&self, name: &str) -> Result<&EntitySchema> {
        self.schemas
            .get(name)
            .ok_or_else(|| Error::UnknownSchema(name.to_string()))
    }

    pub(crate) fn add_space(&mut self, space: Space) {
        self.spaces.push(space);
    }

    /// Register an effect, returning the id of an equal one if present.
    pub fn register_effect(&mut self, effect: DagEffect) -> Result<EffectId> {
        if let Some(id) = self.effects.iter().position(|e| *e == effect) {
            return Ok(id);
        }
        effect.validate()?;
        let event = self.schema(&effect.event_schema)?;
        if !event.is_event() {
            return Err(Error::InvalidConfig(format!(
                "effect schema {} is not an event schema",
                event.name
            )));
        }
        for reference in [&effect.affected, &effect.affecting] {
            let field = event.get_field(&reference.field)?;
            if field.field_type != FieldType::SchemaReference(reference.schema.clone()) {
                return Err(Error::InvalidConfig(format!(
                    "{}.{} does not reference {}",
                    event.name, reference.field, reference.schema
                )));
            }
            self.schema(&reference.schema)?;
        }
        for weighted in &effect.filters {
            event.get_field(&weighted.filter.field)?;
        }
        self.effects.push(effect);
        Ok(self.effects.len() - 1)
    }

    #[must_use]
    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index)
    }

    /// Create a node, or return the existing node with the same id.
    pub fn create_node(&mut self, kind: NodeKind, parents: &[NodeIndex]) -> Result<NodeIndex> {
        let parent_ids = parents
            .iter()
            .map(|&p| {
                self.nodes
                    .get(p)
                    .map(|n| n.id.as_str())
                    .ok_or_else(|| Error::InvalidDagStructure(format!("unknown parent node {}", p)))
            })
            .collect::<Result<Vec<_>>>()?;
        let id = node_id(&kind, &parent_ids)?;

        if let Some(&existing) = self.by_id.get(&id) {
            let node = &self.nodes[existing];
            if node.kind.same_variant(&kind) {
                return Ok(existing);
            }
            return Err(Error::DuplicateNodeId {
                id,
                existing: node.kind.name().to_string(),
                requested: kind.name().to_string(),
            });
        }

        self.check_parents(&kind, parents)?;
        let (schemas, effects) = self.propagate(&kind, parents)?;
        let length = match &kind {
            NodeKind::Index { .. } => parents.first().map_or(0, |&p| self.nodes[p].length),
            other => other.own_length(),
        };

        let index = self.nodes.len();
        for &parent in parents {
            let parent = &mut self.nodes[parent];
            parent.persist_evaluation_result |= kind.persists_parents();
            parent.children.push(index);
        }
        debug!(node = %id, kind = kind.name(), parents = parents.len(), "created node");
        self.by_id.insert(id.clone(), index);
        self.nodes.push(Node {
            id,
            persist_evaluation_result: kind.persists(),
            kind,
            parents: parents.to_vec(),
            children: Vec::new(),
            schemas,
            effects,
            length,
        });
        Ok(index)
    }

    fn propagate(&mut self, kind: &NodeKind, parents: &[NodeIndex]) -> Result<(BTreeSet<String>, BTreeSet<EffectId>)> {
        let mut effects: BTreeSet<EffectId> = parents
            .iter()
            .flat_map(|&p| self.nodes[p].effects.iter().copied())
            .collect();
        let schemas = match kind {
            NodeKind::SchemaField { field } => BTreeSet::from([field.schema.clone()]),
            NodeKind::EventAggregation { effect, .. } => {
                effects.insert(self.register_effect(effect.clone())?);
                BTreeSet::from([effect.event_schema.clone(), effect.affected.schema.clone()])
            }
            _ => parents
                .iter()
                .flat_map(|&p| self.nodes[p].schemas.iter().cloned())
                .collect(),
        };
        Ok((schemas, effects))
    }

    fn check_parents(&self, kind: &NodeKind, parents: &[NodeIndex]) -> Result<()> {
        let lengths: Vec<usize> = parents.iter().map(|&p| self.nodes[p].length).collect();
        let invalid = |reason: String| Err(Error::InvalidDagStructure(format!("{} node {}", kind.name(), reason)));
        match kind {
            NodeKind::SchemaField { .. } if !parents.is_empty() => invalid("must not have parents".into()),
            NodeKind::ComparisonFilter { .. } | NodeKind::Chunking { .. } | NodeKind::Embedding { .. }
                if parents.len() != 1 =>
            {
                invalid(format!("needs exactly one parent, got {}", parents.len()))
            }
            NodeKind::Aggregation { weights, transform, .. } => {
                if weights.len() != parents.len() || parents.is_empty() {
                    return invalid(format!("has {} weights for {} parents", weights.len(), parents.len()));
                }
                match lengths.iter().find(|&&l| l != transform.length()) {
                    Some(l) => invalid(format!("parent length {} differs from {}", l, transform.length())),
                    None => Ok(()),
                }
            }
            NodeKind::EventAggregation { transform, effect, .. } => match lengths.first() {
                Some(&l) if l == transform.length() && lengths.len() == effect.filters.len() + 1 => Ok(()),
                _ => invalid("needs the affecting embedding followed by one node per filter".into()),
            },
            NodeKind::Concatenation { layout } => {
                if parents.is_empty() {
                    return invalid("has no parents".into());
                }
                let mut slots = layout.iter();
                for &parent in parents {
                    let node = &self.nodes[parent];
                    let space = node.kind.space().unwrap_or_default();
                    match slots.find(|s| s.space == space) {
                        Some(slot) if slot.length == node.length => {}
                        _ => return invalid(format!("parent {} does not match the space layout", node.id)),
                    }
                }
                Ok(())
            }
            NodeKind::Index { .. } => match lengths.first() {
                None => invalid("has no parents".into()),
                Some(first) if lengths.iter().any(|l| l != first) => {
                    invalid("parents have different lengths".into())
                }
                Some(_) => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Freeze the arena. Requires exactly one index node.
    pub fn build(self) -> Result<Dag> {
        Dag::new(self.nodes, self.schemas, self.effects, self.spaces)
    }
}
