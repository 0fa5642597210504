//! The frozen node graph and its projections.
//!
//! A [`Dag`] covers every entity type of an index. Evaluation never walks
//! the whole graph: it walks a [`SchemaDag`], the part of the graph that
//! computes either one entity type's index vector or one effect's
//! event aggregations.

use crate::effect::{DagEffect, EffectId};
use crate::index::Space;
use crate::node::{Node, NodeIndex, NodeKind};
use linkvec_core::{EntitySchema, Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Dag {
    nodes: Vec<Node>,
    index: NodeIndex,
    schemas: BTreeMap<String, EntitySchema>,
    effects: Vec<DagEffect>,
    spaces: Vec<Space>,
}

impl Dag {
    /// Validates unique node ids and a single index node.
    pub fn new(
        nodes: Vec<Node>,
        schemas: BTreeMap<String, EntitySchema>,
        effects: Vec<DagEffect>,
        spaces: Vec<Space>,
    ) -> Result<Self> {
        let mut ids = HashSet::with_capacity(nodes.len());
        for node in &nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(Error::InvalidDagStructure(format!("node id {} is not unique", node.id)));
            }
        }
        let index_nodes: Vec<NodeIndex> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Index { .. }))
            .map(|(i, _)| i)
            .collect();
        let index = match index_nodes.as_slice() {
            [single] => *single,
            other => {
                return Err(Error::InvalidDagStructure(format!(
                    "expected exactly one index node, found {}",
                    other.len()
                )))
            }
        };
        info!(
            nodes = nodes.len(),
            schemas = schemas.len(),
            effects = effects.len(),
            "dag built"
        );
        Ok(Self {
            nodes,
            index,
            schemas,
            effects,
            spaces,
        })
    }

    #[inline]
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// # Panics
    /// If `index` was not produced by this dag.
    #[inline]
    #[must_use]
    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index]
    }

    #[inline]
    #[must_use]
    pub fn index_node(&self) -> NodeIndex {
        self.index
    }

    /// Name of the index this graph computes.
    #[must_use]
    pub fn index_name(&self) -> &str {
        match &self.nodes[self.index].kind {
            NodeKind::Index { name } => name,
            _ => "",
        }
    }

    pub fn schema(&self, name: &str) -> Result<&EntitySchema> {
        self.schemas
            .get(name)
            .ok_or_else(|| Error::UnknownSchema(name.to_string()))
    }

    pub fn schemas(&self) -> impl Iterator<Item = &EntitySchema> {
        self.schemas.values()
    }

    #[must_use]
    pub fn effects(&self) -> &[DagEffect] {
        &self.effects
    }

    pub fn effect(&self, id: EffectId) -> Result<&DagEffect> {
        self.effects
            .get(id)
            .ok_or_else(|| Error::InvalidDagStructure(format!("unknown effect {}", id)))
    }

    /// Effects triggered by events of `event_schema`.
    #[must_use]
    pub fn effects_for_event(&self, event_schema: &str) -> Vec<EffectId> {
        self.effects
            .iter()
            .enumerate()
            .filter(|(_, e)| e.event_schema == event_schema)
            .map(|(i, _)| i)
            .collect()
    }

    #[must_use]
    pub fn spaces(&self) -> &[Space] {
        &self.spaces
    }

    pub fn space(&self, name: &str) -> Result<&Space> {
        self.spaces
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::UnknownSpace(name.to_string()))
    }

    /// Entity types with an index vector.
    #[must_use]
    pub fn indexed_schemas(&self) -> Vec<&str> {
        self.nodes[self.index]
            .schemas
            .iter()
            .filter(|s| self.schemas.get(*s).is_some_and(|schema| !schema.is_event()))
            .map(String::as_str)
            .collect()
    }

    /// Per-space segment lengths of a concatenation node.
    #[must_use]
    pub fn segment_lengths(&self, concatenation: NodeIndex) -> Vec<usize> {
        match &self.nodes[concatenation].kind {
            NodeKind::Concatenation { layout } => layout.iter().map(|s| s.length).collect(),
            _ => vec![self.nodes[concatenation].length],
        }
    }

    /// Subgraph computing the index vector of `schema` entities.
    pub fn project_to_schema(&self, schema: &str) -> Result<SchemaDag> {
        if self.schema(schema)?.is_event() || !self.nodes[self.index].has_schema(schema) {
            return Err(Error::UnknownSchema(format!("{} is not part of index {}", schema, self.index_name())));
        }
        let projection = self.project(ProjectionTarget::Schema(schema.to_string()), &[self.index], |node| {
            match &node.kind {
                NodeKind::Concatenation { .. } | NodeKind::Aggregation { .. } => {
                    if node.has_schema(schema) {
                        node.parents.clone()
                    } else {
                        Vec::new()
                    }
                }
                NodeKind::EventAggregation { effect, .. } => {
                    if effect.event_schema == schema {
                        node.parents.clone()
                    } else {
                        Vec::new()
                    }
                }
                _ => self.parents_with_schema(node, schema),
            }
        });
        match projection.terminals.as_slice() {
            [terminal] if *terminal == self.index => Ok(projection),
            other => Err(Error::InvalidDagStructure(format!(
                "projection to {} must end in the index node, found {} terminals",
                schema,
                other.len()
            ))),
        }
    }

    /// Subgraph computing the event aggregations of one effect.
    pub fn project_to_effect(&self, effect_id: EffectId) -> Result<SchemaDag> {
        let effect = self.effect(effect_id)?;
        let starts: Vec<NodeIndex> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| matches!(&n.kind, NodeKind::EventAggregation { effect: e, .. } if e == effect))
            .map(|(i, _)| i)
            .collect();
        if starts.is_empty() {
            return Err(Error::InvalidDagStructure(format!(
                "effect on {} has no event aggregation node",
                effect.event_schema
            )));
        }
        let event_schema = effect.event_schema.as_str();
        let projection = self.project(ProjectionTarget::Effect(effect_id), &starts, |node| match &node.kind {
            NodeKind::EventAggregation { .. } => node.parents.clone(),
            _ => self.parents_with_schema(node, event_schema),
        });
        let all_aggregations = projection
            .terminals
            .iter()
            .all(|&t| matches!(self.nodes[t].kind, NodeKind::EventAggregation { .. }));
        if !all_aggregations {
            return Err(Error::InvalidDagStructure(format!(
                "projection of effect on {} must end in event aggregation nodes",
                event_schema
            )));
        }
        Ok(projection)
    }

    fn parents_with_schema(&self, node: &Node, schema: &str) -> Vec<NodeIndex> {
        node.parents
            .iter()
            .copied()
            .filter(|&p| self.nodes[p].has_schema(schema))
            .collect()
    }

    fn project<F>(&self, target: ProjectionTarget, starts: &[NodeIndex], projected_parents: F) -> SchemaDag
    where
        F: Fn(&Node) -> Vec<NodeIndex>,
    {
        let mut parents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        // iterative post-order, parents before children
        let mut stack: Vec<(NodeIndex, bool)> = starts.iter().rev().map(|&s| (s, false)).collect();
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            if !visited.insert(current) {
                continue;
            }
            let node_parents = projected_parents(&self.nodes[current]);
            stack.push((current, true));
            for &parent in node_parents.iter().rev() {
                if !visited.contains(&parent) {
                    stack.push((parent, false));
                }
            }
            parents.insert(current, node_parents);
        }

        let has_child: HashSet<NodeIndex> = parents.values().flatten().copied().collect();
        let terminals = order.iter().copied().filter(|n| !has_child.contains(n)).collect();
        SchemaDag {
            target,
            nodes: order,
            parents,
            terminals,
        }
    }
}

/// What a [`SchemaDag`] was projected for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionTarget {
    Schema(String),
    Effect(EffectId),
}

/// A projected subgraph. Nodes are in evaluation order.
#[derive(Debug, Clone)]
pub struct SchemaDag {
    target: ProjectionTarget,
    nodes: Vec<NodeIndex>,
    parents: HashMap<NodeIndex, Vec<NodeIndex>>,
    terminals: Vec<NodeIndex>,
}

impl SchemaDag {
    #[must_use]
    pub fn target(&self) -> &ProjectionTarget {
        &self.target
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodeIndex] {
        &self.nodes
    }

    #[must_use]
    pub fn contains(&self, node: NodeIndex) -> bool {
        self.parents.contains_key(&node)
    }

    /// Parents of `node` inside the projection.
    #[must_use]
    pub fn parents(&self, node: NodeIndex) -> &[NodeIndex] {
        self.parents.get(&node).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn terminals(&self) -> &[NodeIndex] {
        &self.terminals
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::purchase_index;
    use crate::{NodeKind, ProjectionTarget};

    #[test]
    fn test_schema_projection_ends_in_index() {
        let dag = purchase_index();
        let projection = dag.project_to_schema("user").unwrap();
        assert_eq!(projection.terminals(), &[dag.index_node()]);
        assert_eq!(projection.target(), &ProjectionTarget::Schema("user".into()));
        // evaluation order puts parents first
        let position = |n| projection.nodes().iter().position(|&x| x == n).unwrap();
        for &node in projection.nodes() {
            for &parent in projection.parents(node) {
                assert!(position(parent) < position(node));
            }
        }
    }

    #[test]
    fn test_schema_projection_stops_at_event_aggregation() {
        let dag = purchase_index();
        let projection = dag.project_to_schema("user").unwrap();
        let event_aggs: Vec<_> = projection
            .nodes()
            .iter()
            .copied()
            .filter(|&n| matches!(dag.node(n).kind(), NodeKind::EventAggregation { .. }))
            .collect();
        assert!(!event_aggs.is_empty());
        for node in event_aggs {
            assert!(projection.parents(node).is_empty());
        }
        // product nodes never enter the user projection
        assert!(projection
            .nodes()
            .iter()
            .all(|&n| dag.node(n).has_schema("user")));
    }

    #[test]
    fn test_effect_projection_terminals() {
        let dag = purchase_index();
        let effects = dag.effects_for_event("purchase");
        assert_eq!(effects.len(), 1);
        let projection = dag.project_to_effect(effects[0]).unwrap();
        assert!(!projection.terminals().is_empty());
        for &terminal in projection.terminals() {
            assert!(matches!(dag.node(terminal).kind(), NodeKind::EventAggregation { .. }));
            // affecting embedding is loaded, not recomputed
            let affecting = projection.parents(terminal)[0];
            assert!(projection.parents(affecting).is_empty());
            assert!(dag.node(affecting).persist_evaluation_result());
        }
    }

    #[test]
    fn test_unknown_schema() {
        let dag = purchase_index();
        assert!(dag.project_to_schema("order").is_err());
        assert!(dag.project_to_schema("purchase").is_err());
        assert!(dag.effects_for_event("user").is_empty());
    }
}
