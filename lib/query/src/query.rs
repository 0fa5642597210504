//! Query descriptors

use linkvec_core::{ComparisonFilter, Error, FieldValue, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_SPACE_WEIGHT: f32 = 1.0;

/// Route a literal value to the embedding of one space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarClause {
    pub space: String,
    pub value: FieldValue,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

/// Search near the stored index vector of an existing entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LooksLike {
    pub object_id: String,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    DEFAULT_SPACE_WEIGHT
}

/// A knn query against one entity type of an index.
///
/// ```rust
/// use linkvec_core::FieldValue;
/// use linkvec_query::QueryDescriptor;
///
/// let query = QueryDescriptor::new("product")
///     .space_weight("rating", 2.0)
///     .similar("description", FieldValue::String("trail shoes".into()), 1.0)
///     .limit(5);
/// assert_eq!(query.weight_of("rating"), 2.0);
/// assert_eq!(query.weight_of("description"), 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub schema: String,
    #[serde(default)]
    pub space_weights: BTreeMap<String, f32>,
    #[serde(default)]
    pub similar: Vec<SimilarClause>,
    #[serde(default)]
    pub looks_like: Option<LooksLike>,
    /// Hard filters on entity fields.
    #[serde(default)]
    pub filters: Vec<ComparisonFilter>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub radius: Option<f32>,
    /// Natural-language text used to fill parameters left unset.
    #[serde(default)]
    pub natural_query: Option<String>,
}

impl QueryDescriptor {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            space_weights: BTreeMap::new(),
            similar: Vec::new(),
            looks_like: None,
            filters: Vec::new(),
            limit: None,
            radius: None,
            natural_query: None,
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let query: Self = serde_json::from_str(raw).map_err(|e| Error::Serialization(e.to_string()))?;
        query.validate()?;
        Ok(query)
    }

    #[must_use]
    pub fn space_weight(mut self, space: impl Into<String>, weight: f32) -> Self {
        self.space_weights.insert(space.into(), weight);
        self
    }

    #[must_use]
    pub fn similar(mut self, space: impl Into<String>, value: FieldValue, weight: f32) -> Self {
        self.similar.push(SimilarClause {
            space: space.into(),
            value,
            weight,
        });
        self
    }

    #[must_use]
    pub fn with_vector(self, object_id: impl Into<String>) -> Self {
        self.with_weighted_vector(object_id, DEFAULT_SPACE_WEIGHT)
    }

    #[must_use]
    pub fn with_weighted_vector(mut self, object_id: impl Into<String>, weight: f32) -> Self {
        self.looks_like = Some(LooksLike {
            object_id: object_id.into(),
            weight,
        });
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: ComparisonFilter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn radius(mut self, radius: f32) -> Self {
        self.radius = Some(radius);
        self
    }

    #[must_use]
    pub fn natural_query(mut self, text: impl Into<String>) -> Self {
        self.natural_query = Some(text.into());
        self
    }

    #[inline]
    pub fn weight_of(&self, space: &str) -> f32 {
        self.space_weights.get(space).copied().unwrap_or(DEFAULT_SPACE_WEIGHT)
    }

    #[inline]
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }

    pub fn similar_for<'a>(&'a self, space: &'a str) -> impl Iterator<Item = &'a SimilarClause> + 'a {
        self.similar.iter().filter(move |clause| clause.space == space)
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == Some(0) {
            return Err(Error::InvalidInput("query limit must be positive".into()));
        }
        if let Some(radius) = self.radius {
            if !(0.0..=2.0).contains(&radius) {
                return Err(Error::InvalidInput(format!("radius {} outside [0, 2]", radius)));
            }
        }
        let weights = self
            .space_weights
            .values()
            .chain(self.similar.iter().map(|c| &c.weight))
            .chain(self.looks_like.iter().map(|l| &l.weight));
        for weight in weights {
            if !weight.is_finite() {
                return Err(Error::InvalidInput(format!("weight {} is not finite", weight)));
            }
        }
        Ok(())
    }

    /// Take parameters from `filled` that this query leaves unset.
    pub fn merge_missing(&mut self, filled: QueryDescriptor) {
        for (space, weight) in filled.space_weights {
            self.space_weights.entry(space).or_insert(weight);
        }
        let mut similar = filled.similar;
        similar.retain(|clause| self.similar_for(&clause.space).next().is_none());
        self.similar.extend(similar);
        if self.looks_like.is_none() {
            self.looks_like = filled.looks_like;
        }
        for filter in filled.filters {
            if !self.filters.iter().any(|f| f.field == filter.field) {
                self.filters.push(filter);
            }
        }
        self.limit = self.limit.or(filled.limit);
        self.radius = self.radius.or(filled.radius);
    }
}
