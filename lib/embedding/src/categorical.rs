//! Categorical n-hot embedding
//!
//! One slot per declared category plus a trailing "other" slot, which is
//! only filled when `uncategorized_as_category` is set. Unmatched slots are
//! negative-filter components: at ingestion they hold `negative_filter`, at
//! query time they hold `0`.

use linkvec_core::{Error, ExecutionContext, Result, Vector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEmbeddingConfig {
    pub categories: Vec<String>,
    #[serde(default = "default_uncategorized")]
    pub uncategorized_as_category: bool,
    #[serde(default)]
    pub negative_filter: f32,
}

fn default_uncategorized() -> bool {
    true
}

impl CategoricalEmbeddingConfig {
    pub fn new(categories: Vec<String>) -> Result<Self> {
        let config = Self {
            categories,
            uncategorized_as_category: true,
            negative_filter: 0.0,
        };
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn drop_uncategorized(mut self) -> Self {
        self.uncategorized_as_category = false;
        self
    }

    pub fn with_negative_filter(mut self, negative_filter: f32) -> Result<Self> {
        self.negative_filter = negative_filter;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            return Err(Error::InvalidConfig(
                "categorical space needs at least one category".into(),
            ));
        }
        let unique: BTreeSet<&String> = self.categories.iter().collect();
        if unique.len() != self.categories.len() {
            return Err(Error::InvalidConfig("categories must be unique".into()));
        }
        if self.negative_filter > 0.0 {
            return Err(Error::InvalidConfig(format!(
                "negative_filter must not be positive, got {}",
                self.negative_filter
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEmbedding {
    config: CategoricalEmbeddingConfig,
}

impl CategoricalEmbedding {
    pub fn new(config: CategoricalEmbeddingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &CategoricalEmbeddingConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn length(&self) -> usize {
        self.config.categories.len() + 1
    }

    #[inline]
    fn other_index(&self) -> usize {
        self.config.categories.len()
    }

    /// All zeros, every slot flagged as a negative filter.
    #[must_use]
    pub fn default_vector(&self) -> Vector {
        Vector::with_negative_filter(vec![0.0; self.length()], 0..self.length())
            .unwrap_or_else(|_| Vector::zeros(self.length()))
    }

    #[must_use]
    pub fn embed(&self, values: &[String], context: &ExecutionContext) -> Vector {
        if values.is_empty() {
            return self.default_vector();
        }
        let matched: BTreeSet<usize> = values
            .iter()
            .filter_map(|value| self.category_index(value))
            .collect();

        let category_count = self.config.categories.len() as f32;
        let (fill, hit) = if context.is_query() {
            (0.0, category_count.sqrt() / values.len() as f32)
        } else {
            (self.config.negative_filter, 1.0 / category_count.sqrt())
        };

        let mut data = vec![fill; self.length()];
        for &index in &matched {
            data[index] = hit;
        }
        let negative_filter_indices = (0..self.length()).filter(|i| !matched.contains(i));
        Vector::with_negative_filter(data, negative_filter_indices)
            .unwrap_or_else(|_| self.default_vector())
    }

    fn category_index(&self, value: &str) -> Option<usize> {
        self.config
            .categories
            .iter()
            .position(|category| category == value)
            .or_else(|| {
                self.config
                    .uncategorized_as_category
                    .then(|| self.other_index())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn colors() -> CategoricalEmbedding {
        CategoricalEmbedding::new(
            CategoricalEmbeddingConfig::new(vec!["red".into(), "green".into(), "blue".into(), "black".into()])
                .unwrap(),
        )
        .unwrap()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_length_and_nonzero_count() {
        let embedding = colors();
        let ctx = ExecutionContext::ingestion(0);
        for input in [vec!["red"], vec!["red", "blue"], vec!["purple"], vec!["green", "green"]] {
            let vector = embedding.embed(&strings(&input), &ctx);
            assert_eq!(vector.dim(), 5);
            let matched: BTreeSet<&str> = input.iter().copied().collect();
            let nonzero = vector.as_slice()[..4].iter().filter(|v| **v != 0.0).count();
            assert!(nonzero <= matched.len());
        }
    }

    #[test]
    fn test_ingestion_values() {
        let config = CategoricalEmbeddingConfig::new(vec!["a".into(), "b".into(), "c".into(), "d".into()])
            .unwrap()
            .with_negative_filter(-2.0)
            .unwrap();
        let embedding = CategoricalEmbedding::new(config).unwrap();
        let vector = embedding.embed(&strings(&["b"]), &ExecutionContext::ingestion(0));
        assert_eq!(vector.as_slice(), &[-2.0, 0.5, -2.0, -2.0, -2.0]);
        assert!(!vector.is_negative_filter(1));
        assert_eq!(vector.negative_filter_indices().len(), 4);
    }

    #[test]
    fn test_query_values() {
        let vector = colors().embed(&strings(&["red", "blue"]), &ExecutionContext::query(0));
        assert_eq!(vector.as_slice(), &[1.0, 0.0, 1.0, 0.0, 0.0]);
        assert!(vector.is_negative_filter(1));
    }

    #[test]
    fn test_other_bucket() {
        let ctx = ExecutionContext::ingestion(0);
        let with_other = colors().embed(&strings(&["purple"]), &ctx);
        assert!(with_other.as_slice()[4] > 0.0);

        let without = CategoricalEmbedding::new(
            colors().config().clone().drop_uncategorized(),
        )
        .unwrap()
        .embed(&strings(&["purple"]), &ctx);
        assert!(without.as_slice().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_empty_input_is_default() {
        let embedding = colors();
        assert_eq!(
            embedding.embed(&[], &ExecutionContext::ingestion(0)),
            embedding.default_vector()
        );
    }

    #[test]
    fn test_invalid_config() {
        assert!(CategoricalEmbeddingConfig::new(vec![]).is_err());
        assert!(CategoricalEmbeddingConfig::new(vec!["a".into(), "a".into()]).is_err());
    }
}
