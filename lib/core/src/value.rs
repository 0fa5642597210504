//! Typed field values and node outputs.

use crate::error::{Error, Result};
use crate::schema::FieldType;
use crate::vector::Vector;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// The parsed value of one schema field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
    /// Seconds since the Unix epoch.
    Timestamp(i64),
    StringList(Vec<String>),
    FloatList(Vec<f64>),
    /// Blob location (path, url or base64 payload), handed to the model provider as is.
    Blob(String),
    /// Object id of a referenced entity.
    Reference(String),
}

impl FieldValue {
    /// Parse a JSON value according to the declared field type.
    pub fn from_json(field: &str, field_type: &FieldType, value: &Value) -> Result<Self> {
        match field_type {
            FieldType::String => value
                .as_str()
                .map(|s| FieldValue::String(s.to_string()))
                .ok_or_else(|| Error::type_mismatch(field, "string")),
            FieldType::Integer => value
                .as_i64()
                .map(FieldValue::Integer)
                .ok_or_else(|| Error::type_mismatch(field, "integer")),
            FieldType::Float => value
                .as_f64()
                .map(FieldValue::Float)
                .ok_or_else(|| Error::type_mismatch(field, "float")),
            FieldType::Timestamp => value
                .as_i64()
                .map(FieldValue::Timestamp)
                .ok_or_else(|| Error::type_mismatch(field, "timestamp in seconds")),
            FieldType::StringList => match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| Error::type_mismatch(field, "list of strings"))
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(FieldValue::StringList),
                Value::String(s) => Ok(FieldValue::StringList(vec![s.clone()])),
                _ => Err(Error::type_mismatch(field, "list of strings")),
            },
            FieldType::FloatList => match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| item.as_f64().ok_or_else(|| Error::type_mismatch(field, "list of numbers")))
                    .collect::<Result<Vec<_>>>()
                    .map(FieldValue::FloatList),
                _ => Err(Error::type_mismatch(field, "list of numbers")),
            },
            FieldType::Blob => value
                .as_str()
                .map(|s| FieldValue::Blob(s.to_string()))
                .ok_or_else(|| Error::type_mismatch(field, "blob reference")),
            FieldType::SchemaReference(_) => match value {
                Value::String(s) => Ok(FieldValue::Reference(s.clone())),
                Value::Number(n) => Ok(FieldValue::Reference(n.to_string())),
                _ => Err(Error::type_mismatch(field, "object id")),
            },
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) | FieldValue::Timestamp(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            FieldValue::FloatList(values) => Some(values),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) | FieldValue::Blob(s) | FieldValue::Reference(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            FieldValue::Timestamp(v) | FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Categories carried by the value: a list as is, a single string as one item.
    #[must_use]
    pub fn as_categories(&self) -> Vec<String> {
        match self {
            FieldValue::StringList(items) => items.clone(),
            FieldValue::String(s) => vec![s.clone()],
            FieldValue::Integer(v) => vec![v.to_string()],
            _ => Vec::new(),
        }
    }

    /// Ordering used by comparison filters. Numbers compare numerically,
    /// strings lexicographically; anything else is unordered.
    #[must_use]
    pub fn compare(&self, other: &FieldValue) -> Option<Ordering> {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => match (self.as_str(), other.as_str()) {
                (Some(a), Some(b)) => Some(a.cmp(b)),
                _ => None,
            },
        }
    }
}

/// The output of a graph node for one entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NodeValue {
    Field(FieldValue),
    Vector(Vector),
    Bool(bool),
    /// Chunks of a text field.
    Texts(Vec<String>),
}

impl NodeValue {
    #[must_use]
    pub fn as_vector(&self) -> Option<&Vector> {
        match self {
            NodeValue::Vector(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_vector(self) -> Option<Vector> {
        match self {
            NodeValue::Vector(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_field(&self) -> Option<&FieldValue> {
        match self {
            NodeValue::Field(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NodeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<Vector> for NodeValue {
    fn from(vector: Vector) -> Self {
        NodeValue::Vector(vector)
    }
}

impl From<FieldValue> for NodeValue {
    fn from(value: FieldValue) -> Self {
        NodeValue::Field(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_by_type() {
        assert_eq!(
            FieldValue::from_json("rating", &FieldType::Integer, &json!(5)).unwrap(),
            FieldValue::Integer(5)
        );
        assert_eq!(
            FieldValue::from_json("tags", &FieldType::StringList, &json!(["a", "b"])).unwrap(),
            FieldValue::StringList(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            FieldValue::from_json("user", &FieldType::SchemaReference("user".into()), &json!(7))
                .unwrap(),
            FieldValue::Reference("7".into())
        );
        assert_eq!(
            FieldValue::from_json("embedding", &FieldType::FloatList, &json!([1, 0.5])).unwrap(),
            FieldValue::FloatList(vec![1.0, 0.5])
        );
        assert!(FieldValue::from_json("embedding", &FieldType::FloatList, &json!([1, "x"])).is_err());
        assert!(FieldValue::from_json("rating", &FieldType::Integer, &json!("five")).is_err());
    }

    #[test]
    fn test_compare_mixed_numbers() {
        let a = FieldValue::Integer(3);
        let b = FieldValue::Float(3.5);
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert_eq!(
            FieldValue::String("b".into()).compare(&FieldValue::String("a".into())),
            Some(Ordering::Greater)
        );
        assert_eq!(a.compare(&FieldValue::String("3".into())), None);
    }
}
