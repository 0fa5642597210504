// Comparison filters over field values, used by event effects and knn search
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    In,
    NotIn,
}

/// `field <op> operand`, evaluated against a single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonFilter {
    pub field: String,
    pub operator: ComparisonOperator,
    pub operands: Vec<FieldValue>,
}

impl ComparisonFilter {
    #[must_use]
    pub fn new(field: impl Into<String>, operator: ComparisonOperator, operand: FieldValue) -> Self {
        Self {
            field: field.into(),
            operator,
            operands: vec![operand],
        }
    }

    #[must_use]
    pub fn eq(field: impl Into<String>, operand: FieldValue) -> Self {
        Self::new(field, ComparisonOperator::Equal, operand)
    }

    #[must_use]
    pub fn one_of(field: impl Into<String>, operands: Vec<FieldValue>) -> Self {
        Self {
            field: field.into(),
            operator: ComparisonOperator::In,
            operands,
        }
    }

    /// Evaluate against a value; a missing value only passes negated operators.
    #[must_use]
    pub fn matches(&self, value: Option<&FieldValue>) -> bool {
        let Some(value) = value else {
            return matches!(
                self.operator,
                ComparisonOperator::NotEqual | ComparisonOperator::NotIn
            );
        };
        let equals = |operand: &FieldValue| {
            value == operand || value.compare(operand) == Some(Ordering::Equal)
        };
        let ordering = || self.operands.first().and_then(|operand| value.compare(operand));
        match self.operator {
            ComparisonOperator::Equal => self.operands.first().is_some_and(equals),
            ComparisonOperator::NotEqual => !self.operands.first().is_some_and(equals),
            ComparisonOperator::In => self.operands.iter().any(equals),
            ComparisonOperator::NotIn => !self.operands.iter().any(equals),
            ComparisonOperator::GreaterThan => ordering() == Some(Ordering::Greater),
            ComparisonOperator::GreaterEqual => {
                matches!(ordering(), Some(Ordering::Greater | Ordering::Equal))
            }
            ComparisonOperator::LessThan => ordering() == Some(Ordering::Less),
            ComparisonOperator::LessEqual => {
                matches!(ordering(), Some(Ordering::Less | Ordering::Equal))
            }
        }
    }

    /// Evaluate against a map of field values.
    #[must_use]
    pub fn matches_fields(&self, fields: &HashMap<String, FieldValue>) -> bool {
        self.matches(fields.get(&self.field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality() {
        let filter = ComparisonFilter::eq("kind", FieldValue::String("buy".into()));
        assert!(filter.matches(Some(&FieldValue::String("buy".into()))));
        assert!(!filter.matches(Some(&FieldValue::String("view".into()))));
        assert!(!filter.matches(None));
    }

    #[test]
    fn test_numeric_comparisons() {
        let filter = ComparisonFilter::new(
            "rating",
            ComparisonOperator::GreaterEqual,
            FieldValue::Integer(3),
        );
        assert!(filter.matches(Some(&FieldValue::Float(3.0))));
        assert!(filter.matches(Some(&FieldValue::Integer(4))));
        assert!(!filter.matches(Some(&FieldValue::Integer(2))));
    }

    #[test]
    fn test_membership() {
        let filter = ComparisonFilter::one_of(
            "color",
            vec![FieldValue::String("red".into()), FieldValue::String("blue".into())],
        );
        let mut fields = HashMap::new();
        fields.insert("color".to_string(), FieldValue::String("blue".into()));
        assert!(filter.matches_fields(&fields));
        fields.insert("color".to_string(), FieldValue::String("green".into()));
        assert!(!filter.matches_fields(&fields));

        let negated = ComparisonFilter {
            operator: ComparisonOperator::NotIn,
            ..filter
        };
        assert!(negated.matches(None));
    }
}
