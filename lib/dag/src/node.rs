//! Graph nodes and their content-addressed identity.

use crate::effect::{DagEffect, EffectId};
use linkvec_core::{ComparisonFilter, Result, SchemaField};
use linkvec_embedding::{ChunkingConfig, EmbeddingTransform};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Position of a node in the [`Dag`](crate::Dag) arena.
pub type NodeIndex = usize;

/// Length of a node id in hex characters.
pub const NODE_ID_LENGTH: usize = 16;

/// One space slot of a concatenated vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceSegment {
    pub space: String,
    pub length: usize,
}

/// What a node computes. Evaluators match on this exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Reads one field of the entity.
    SchemaField { field: SchemaField },
    /// Tests one event field; yields a boolean.
    ComparisonFilter { filter: ComparisonFilter },
    /// Splits a text field into chunks.
    Chunking { config: ChunkingConfig },
    Embedding {
        space: String,
        transform: EmbeddingTransform,
    },
    /// Blends an entity's own embedding with its event aggregations.
    /// `weights` align with the parents.
    Aggregation {
        space: String,
        transform: EmbeddingTransform,
        weights: Vec<f32>,
    },
    /// Accumulates affecting vectors of one effect. Parents are the
    /// affecting embedding followed by the effect's filter nodes.
    EventAggregation {
        space: String,
        transform: EmbeddingTransform,
        effect: DagEffect,
    },
    /// Joins one vector per space in `layout` order. Spaces without a
    /// parent contribute zeros.
    Concatenation { layout: Vec<SpaceSegment> },
    Index { name: String },
}

impl NodeKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::SchemaField { .. } => "schema_field",
            NodeKind::ComparisonFilter { .. } => "comparison_filter",
            NodeKind::Chunking { .. } => "chunking",
            NodeKind::Embedding { .. } => "embedding",
            NodeKind::Aggregation { .. } => "aggregation",
            NodeKind::EventAggregation { .. } => "event_aggregation",
            NodeKind::Concatenation { .. } => "concatenation",
            NodeKind::Index { .. } => "index",
        }
    }

    /// Whether results of this node are always written to storage.
    #[must_use]
    pub fn persists(&self) -> bool {
        matches!(self, NodeKind::Index { .. } | NodeKind::EventAggregation { .. })
    }

    /// Whether this node needs its parents' results to be stored.
    #[must_use]
    pub fn persists_parents(&self) -> bool {
        matches!(
            self,
            NodeKind::Concatenation { .. } | NodeKind::EventAggregation { .. } | NodeKind::Aggregation { .. }
        )
    }

    /// Space of vector-producing per-space nodes.
    #[must_use]
    pub fn space(&self) -> Option<&str> {
        match self {
            NodeKind::Embedding { space, .. }
            | NodeKind::Aggregation { space, .. }
            | NodeKind::EventAggregation { space, .. } => Some(space),
            _ => None,
        }
    }

    #[must_use]
    pub fn transform(&self) -> Option<&EmbeddingTransform> {
        match self {
            NodeKind::Embedding { transform, .. }
            | NodeKind::Aggregation { transform, .. }
            | NodeKind::EventAggregation { transform, .. } => Some(transform),
            _ => None,
        }
    }

    /// Length of the produced vector, 0 for non-vector nodes. Index nodes
    /// take the length of their parents.
    pub(crate) fn own_length(&self) -> usize {
        match self {
            NodeKind::SchemaField { .. }
            | NodeKind::ComparisonFilter { .. }
            | NodeKind::Chunking { .. }
            | NodeKind::Index { .. } => 0,
            NodeKind::Embedding { transform, .. }
            | NodeKind::Aggregation { transform, .. }
            | NodeKind::EventAggregation { transform, .. } => transform.length(),
            NodeKind::Concatenation { layout } => layout.iter().map(|s| s.length).sum(),
        }
    }

    pub(crate) fn same_variant(&self, other: &NodeKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Content hash of a node: the serialized kind followed by the parent ids.
pub fn node_id(kind: &NodeKind, parent_ids: &[&str]) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_string(kind)?.as_bytes());
    hasher.update(b"|");
    hasher.update(parent_ids.join("|").as_bytes());
    let mut id = format!("{:x}", hasher.finalize());
    id.truncate(NODE_ID_LENGTH);
    Ok(id)
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: String,
    pub(crate) kind: NodeKind,
    pub(crate) parents: Vec<NodeIndex>,
    pub(crate) children: Vec<NodeIndex>,
    pub(crate) schemas: BTreeSet<String>,
    pub(crate) effects: BTreeSet<EffectId>,
    pub(crate) persist_evaluation_result: bool,
    pub(crate) length: usize,
}

impl Node {
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[inline]
    #[must_use]
    pub fn parents(&self) -> &[NodeIndex] {
        &self.parents
    }

    #[inline]
    #[must_use]
    pub fn children(&self) -> &[NodeIndex] {
        &self.children
    }

    #[inline]
    #[must_use]
    pub fn schemas(&self) -> &BTreeSet<String> {
        &self.schemas
    }

    #[inline]
    #[must_use]
    pub fn effects(&self) -> &BTreeSet<EffectId> {
        &self.effects
    }

    #[must_use]
    pub fn has_schema(&self, schema: &str) -> bool {
        self.schemas.contains(schema)
    }

    /// Own persistence flag, or requested by a child.
    #[inline]
    #[must_use]
    pub fn persist_evaluation_result(&self) -> bool {
        self.persist_evaluation_result
    }

    /// Output vector length, 0 for nodes that produce no vector.
    #[inline]
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }
}
