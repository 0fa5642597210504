//! Schema declarations
//!
//! Entity types declare their fields up front. Every entity type has one
//! id field; event types additionally carry a creation timestamp field and
//! reference the entities they connect through schema-reference fields.
//!
//! ```rust
//! use linkvec_core::schema::{EntitySchema, FieldType};
//!
//! let product = EntitySchema::entity("product", "id")
//!     .field("rating", FieldType::Integer)
//!     .field("description", FieldType::String);
//! assert!(product.validate().is_ok());
//! ```

use crate::entity::{EntityId, ParsedEntity};
use crate::error::{Error, Result};
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Field type enumeration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Timestamp,
    StringList,
    /// A precomputed vector.
    FloatList,
    Blob,
    /// Reference to an entity of the named type (event schemas only).
    SchemaReference(String),
}

/// A declared field. Identity is `(name, schema)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub schema: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
}

impl SchemaField {
    #[must_use]
    pub fn new(schema: impl Into<String>, name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            field_type,
            nullable: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self.field_type, FieldType::SchemaReference(_))
    }
}

impl PartialEq for SchemaField {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.schema == other.schema
    }
}

impl Eq for SchemaField {}

impl Hash for SchemaField {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.schema.hash(state);
    }
}

/// Whether a schema describes plain entities or interaction events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Entity,
    Event { created_at: String },
}

/// An entity type declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySchema {
    pub name: String,
    pub id_field: String,
    pub fields: Vec<SchemaField>,
    pub kind: SchemaKind,
}

impl EntitySchema {
    /// Declare an entity type with the given id field.
    #[must_use]
    pub fn entity(name: impl Into<String>, id_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_field: id_field.into(),
            fields: Vec::new(),
            kind: SchemaKind::Entity,
        }
    }

    /// Declare an event type. The creation timestamp field is added automatically.
    #[must_use]
    pub fn event(
        name: impl Into<String>,
        id_field: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let created_at = created_at.into();
        Self {
            fields: vec![SchemaField::new(name.clone(), created_at.clone(), FieldType::Timestamp)],
            name,
            id_field: id_field.into(),
            kind: SchemaKind::Event { created_at },
        }
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(SchemaField::new(self.name.clone(), name, field_type));
        self
    }

    #[must_use]
    pub fn nullable_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields
            .push(SchemaField::new(self.name.clone(), name, field_type).nullable());
        self
    }

    /// Add a schema-reference field pointing at entities of `target`.
    #[must_use]
    pub fn reference(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.field(name, FieldType::SchemaReference(target.into()))
    }

    #[inline]
    #[must_use]
    pub fn is_event(&self) -> bool {
        matches!(self.kind, SchemaKind::Event { .. })
    }

    #[must_use]
    pub fn created_at_field(&self) -> Option<&str> {
        match &self.kind {
            SchemaKind::Event { created_at } => Some(created_at),
            SchemaKind::Entity => None,
        }
    }

    /// Look up a declared field by name.
    pub fn get_field(&self, name: &str) -> Result<&SchemaField> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| {
                Error::InvalidConfig(format!("schema {} has no field {}", self.name, name))
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidConfig("schema name cannot be empty".into()));
        }
        if self.id_field.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "schema {} must declare an id field",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if field.name == self.id_field {
                return Err(Error::InvalidConfig(format!(
                    "field {} of schema {} shadows the id field",
                    field.name, self.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "schema {} declares field {} twice",
                    self.name, field.name
                )));
            }
            if field.is_reference() && !self.is_event() {
                return Err(Error::InvalidConfig(format!(
                    "schema reference {}.{} is only allowed on event schemas",
                    self.name, field.name
                )));
            }
        }
        if let SchemaKind::Event { created_at } = &self.kind {
            let field = self.get_field(created_at)?;
            if field.field_type != FieldType::Timestamp {
                return Err(Error::InvalidConfig(format!(
                    "created_at field {}.{} must be a timestamp",
                    self.name, created_at
                )));
            }
            if !self.fields.iter().any(SchemaField::is_reference) {
                return Err(Error::InvalidConfig(format!(
                    "event schema {} must reference at least one entity schema",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Parse a JSON object into a typed entity. Undeclared keys are ignored;
    /// declared fields may be absent and are resolved at evaluation time.
    pub fn parse_json(&self, payload: &Value) -> Result<ParsedEntity> {
        let object = payload.as_object().ok_or_else(|| {
            Error::InvalidInput(format!("{} payload must be a JSON object", self.name))
        })?;
        let object_id = match object.get(&self.id_field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(Error::MissingField {
                    schema: self.name.clone(),
                    field: self.id_field.clone(),
                    object_id: String::new(),
                })
            }
        };
        let mut fields = HashMap::new();
        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {}
                Some(value) => {
                    let parsed = FieldValue::from_json(&field.name, &field.field_type, value)?;
                    fields.insert(field.name.clone(), parsed);
                }
            }
        }
        if let Some(created_at) = self.created_at_field() {
            if !fields.contains_key(created_at) {
                return Err(Error::MissingField {
                    schema: self.name.clone(),
                    field: created_at.to_string(),
                    object_id,
                });
            }
        }
        Ok(ParsedEntity::new(EntityId::new(object_id, self.name.clone()), fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn interaction() -> EntitySchema {
        EntitySchema::event("interaction", "id", "created_at")
            .reference("user", "user")
            .reference("product", "product")
            .field("kind", FieldType::String)
    }

    #[test]
    fn test_field_identity() {
        let a = SchemaField::new("product", "rating", FieldType::Integer);
        let b = SchemaField::new("product", "rating", FieldType::Float);
        let c = SchemaField::new("user", "rating", FieldType::Integer);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_event_schema_validation() {
        assert!(interaction().validate().is_ok());

        let no_reference = EntitySchema::event("click", "id", "ts");
        assert!(no_reference.validate().is_err());

        let reference_on_entity = EntitySchema::entity("user", "id").reference("friend", "user");
        assert!(reference_on_entity.validate().is_err());
    }

    #[test]
    fn test_parse_json() {
        let schema = EntitySchema::entity("product", "id")
            .field("rating", FieldType::Integer)
            .nullable_field("description", FieldType::String);
        let parsed = schema
            .parse_json(&json!({"id": "a", "rating": 5, "extra": true}))
            .unwrap();
        assert_eq!(parsed.id.object_id, "a");
        assert_eq!(parsed.fields.get("rating"), Some(&FieldValue::Integer(5)));
        assert!(!parsed.fields.contains_key("description"));
    }

    #[test]
    fn test_parse_event_requires_timestamp() {
        let err = interaction()
            .parse_json(&json!({"id": "e1", "user": "u1", "product": "p1"}))
            .unwrap_err();
        assert!(matches!(err, Error::MissingField { .. }));
    }
}
