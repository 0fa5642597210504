use crate::value::{FieldValue, NodeValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identity of an entity: its object id within one schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    pub object_id: String,
    pub schema: String,
}

impl EntityId {
    #[inline]
    #[must_use]
    pub fn new(object_id: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            schema: schema.into(),
        }
    }

    /// Id of the `index`-th chunk of this entity.
    #[must_use]
    pub fn chunk(&self, index: usize) -> Self {
        Self::new(format!("{}#{}", self.object_id, index), self.schema.clone())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schema, self.object_id)
    }
}

/// Cache and persistence key of one node result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeResultKey {
    pub entity: EntityId,
    pub node_id: String,
}

impl NodeResultKey {
    #[inline]
    #[must_use]
    pub fn new(entity: EntityId, node_id: impl Into<String>) -> Self {
        Self {
            entity,
            node_id: node_id.into(),
        }
    }
}

impl fmt::Display for NodeResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity, self.node_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleResult {
    pub node_id: String,
    pub entity: EntityId,
    pub value: NodeValue,
}

impl SingleResult {
    #[must_use]
    pub fn new(node_id: impl Into<String>, entity: EntityId, value: NodeValue) -> Self {
        Self {
            node_id: node_id.into(),
            entity,
            value,
        }
    }
}

/// A node's output for one entity, optionally exploded into chunk results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub main: SingleResult,
    pub chunks: Vec<SingleResult>,
}

impl EvaluationResult {
    #[must_use]
    pub fn single(main: SingleResult) -> Self {
        Self {
            main,
            chunks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_chunks(main: SingleResult, chunks: Vec<SingleResult>) -> Self {
        Self { main, chunks }
    }
}

/// Running statistics of the events applied to one `(entity, node)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    pub effect_count: i64,
    pub effect_avg_ts: Option<i64>,
    pub effect_oldest_ts: Option<i64>,
}

/// An entity whose fields have been parsed against its schema.
/// Absent fields are resolved by the evaluator from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntity {
    pub id: EntityId,
    pub fields: HashMap<String, FieldValue>,
}

impl ParsedEntity {
    #[must_use]
    pub fn new(id: EntityId, fields: HashMap<String, FieldValue>) -> Self {
        Self { id, fields }
    }

    /// An entity update carrying no field values.
    #[must_use]
    pub fn reference(id: EntityId) -> Self {
        Self::new(id, HashMap::new())
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let id = EntityId::new("a", "product");
        assert_eq!(id.to_string(), "product:a");
        assert_eq!(NodeResultKey::new(id.clone(), "abc").to_string(), "product:a:abc");
        assert_eq!(id.chunk(2).object_id, "a#2");
    }
}
