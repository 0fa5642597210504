//! Uniform access to every embedding transform of a space.

use crate::categorical::CategoricalEmbedding;
use crate::custom::CustomEmbedding;
use crate::model::{ModelEmbedding, ModelEmbeddingConfig, ModelRegistry};
use crate::normalization::Normalization;
use crate::number::NumberEmbedding;
use crate::recency::RecencyEmbedding;
use linkvec_core::aggregation::aggregate_weighted;
use linkvec_core::{
    Error, ExecutionContext, FieldValue, NumberAggregation, Result, RetryPolicy, Vector,
    NOT_AFFECTING_WEIGHT,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbeddingTransform {
    Number(NumberEmbedding),
    Categorical(CategoricalEmbedding),
    Recency(RecencyEmbedding),
    Model(ModelEmbeddingConfig),
    Custom(CustomEmbedding),
}

impl EmbeddingTransform {
    #[must_use]
    pub fn length(&self) -> usize {
        match self {
            EmbeddingTransform::Number(e) => e.length(),
            EmbeddingTransform::Categorical(e) => e.length(),
            EmbeddingTransform::Recency(e) => e.length(),
            EmbeddingTransform::Model(c) => c.length,
            EmbeddingTransform::Custom(e) => e.length(),
        }
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            EmbeddingTransform::Number(_) => "number",
            EmbeddingTransform::Categorical(_) => "categorical",
            EmbeddingTransform::Recency(_) => "recency",
            EmbeddingTransform::Model(_) => "model",
            EmbeddingTransform::Custom(_) => "custom",
        }
    }

    /// Vector used for absent values. Query vectors of number spaces carry
    /// the mode's preference; everything else is neutral.
    #[must_use]
    pub fn default_vector(&self, context: &ExecutionContext) -> Vector {
        match self {
            EmbeddingTransform::Number(e) if context.is_query() => e.default_vector(),
            EmbeddingTransform::Number(e) => {
                let zeros = Vector::zeros(e.length());
                e.default_vector().with_values(zeros.into_inner()).unwrap_or_default()
            }
            EmbeddingTransform::Categorical(e) => e.default_vector(),
            EmbeddingTransform::Recency(e) => e.default_vector(),
            EmbeddingTransform::Model(c) => Vector::zeros(c.length),
            EmbeddingTransform::Custom(e) => Vector::zeros(e.length()),
        }
    }

    /// Rescaling applied after vector-space aggregation.
    #[must_use]
    pub fn normalization(&self) -> Normalization {
        match self {
            EmbeddingTransform::Number(_) | EmbeddingTransform::Categorical(_) => Normalization::None,
            EmbeddingTransform::Recency(e) => Normalization::Constant {
                value: e.norm_factor(),
            },
            EmbeddingTransform::Model(_) | EmbeddingTransform::Custom(_) => Normalization::L2,
        }
    }

    /// Spaces aggregated in value space rather than vector space.
    #[must_use]
    pub fn value_aggregation(&self) -> Option<NumberAggregation> {
        match self {
            EmbeddingTransform::Number(_) => Some(NumberAggregation::Avg),
            EmbeddingTransform::Recency(_) => Some(NumberAggregation::Max),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_model_backed(&self) -> bool {
        matches!(self, EmbeddingTransform::Model(_))
    }

    /// Embed a value without a model call.
    pub fn embed(&self, value: &FieldValue, context: &ExecutionContext) -> Result<Vector> {
        match self {
            EmbeddingTransform::Number(e) => value
                .as_f64()
                .map(|v| e.embed(v, context))
                .ok_or_else(|| Error::InvalidInput(format!("number space cannot embed {:?}", value))),
            EmbeddingTransform::Categorical(e) => Ok(e.embed(&value.as_categories(), context)),
            EmbeddingTransform::Recency(e) => value
                .as_timestamp()
                .map(|ts| e.embed(ts, context))
                .ok_or_else(|| Error::InvalidInput(format!("recency space cannot embed {:?}", value))),
            EmbeddingTransform::Model(c) => Err(Error::InvalidInput(format!(
                "model space {} requires a provider call",
                c.model
            ))),
            EmbeddingTransform::Custom(e) => value
                .as_floats()
                .ok_or_else(|| Error::InvalidInput(format!("custom space cannot embed {:?}", value)))
                .and_then(|values| e.embed(values)),
        }
    }

    /// Embed a batch of optional values, calling the model provider once for
    /// model-backed spaces.
    pub async fn embed_values(
        &self,
        values: &[Option<FieldValue>],
        context: &ExecutionContext,
        models: &ModelRegistry,
        retry: &RetryPolicy,
    ) -> Result<Vec<Vector>> {
        match self {
            EmbeddingTransform::Model(config) => {
                let inputs = values
                    .iter()
                    .map(|value| {
                        value.as_ref().map(|v| match v {
                            FieldValue::StringList(items) => config.input(items.join(" ")),
                            other => config.input(other.as_str().map(str::to_string).unwrap_or_default()),
                        })
                    })
                    .collect::<Vec<_>>();
                ModelEmbedding::bind(config, models, retry)?
                    .embed_batch(&inputs)
                    .await
            }
            _ => values
                .iter()
                .map(|value| match value {
                    Some(v) => self.embed(v, context),
                    None => Ok(self.default_vector(context)),
                })
                .collect(),
        }
    }

    /// Recover the scalar of a value-space aggregated vector.
    pub fn inverse_embed(&self, vector: &Vector, context: &ExecutionContext) -> Result<f64> {
        match self {
            EmbeddingTransform::Number(e) => e.inverse_embed(vector),
            EmbeddingTransform::Recency(e) => e.inverse_embed(vector, context).map(|ts| ts as f64),
            _ => Err(Error::InvalidInput(format!(
                "{} space has no inverse embedding",
                self.kind_name()
            ))),
        }
    }

    fn reembed(&self, value: f64, context: &ExecutionContext) -> Result<Vector> {
        match self {
            EmbeddingTransform::Number(e) => Ok(e.embed(value, context)),
            EmbeddingTransform::Recency(e) => Ok(e.embed(value.round() as i64, context)),
            _ => Err(Error::InvalidInput(format!(
                "{} space cannot re-embed a scalar",
                self.kind_name()
            ))),
        }
    }

    /// Aggregate weighted vectors of this space.
    ///
    /// Number and recency spaces invert every vector, aggregate the scalars
    /// and embed the result again. Other spaces sum in vector space and apply
    /// their normalization when `normalize` is set.
    pub fn aggregate(
        &self,
        items: &[(&Vector, f32)],
        context: &ExecutionContext,
        normalize: bool,
    ) -> Result<Vector> {
        let items: Vec<(&Vector, f32)> = items
            .iter()
            .filter(|(v, w)| *w != NOT_AFFECTING_WEIGHT && !v.is_empty())
            .copied()
            .collect();
        if items.is_empty() {
            return Ok(Vector::empty());
        }
        if let Some(aggregation) = self.value_aggregation() {
            let scalars = items
                .iter()
                .map(|(v, w)| Ok((self.inverse_embed(v, context)?, *w)))
                .collect::<Result<Vec<_>>>()?;
            return self.reembed(aggregation.aggregate(&scalars)?, context);
        }
        let summed = aggregate_weighted(items.iter().copied())?;
        Ok(if normalize {
            self.normalization().apply(&summed)
        } else {
            summed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorical::CategoricalEmbeddingConfig;
    use crate::model::HashingModelProvider;
    use crate::number::{NumberEmbeddingConfig, NumberMode};
    use std::sync::Arc;

    fn rating() -> EmbeddingTransform {
        EmbeddingTransform::Number(
            NumberEmbedding::new(NumberEmbeddingConfig::new(0.0, 10.0, NumberMode::Similar).unwrap())
                .unwrap(),
        )
    }

    #[test]
    fn test_number_aggregates_in_value_space() {
        let transform = rating();
        let ctx = ExecutionContext::ingestion(0);
        let low = transform.embed(&FieldValue::Integer(2), &ctx).unwrap();
        let high = transform.embed(&FieldValue::Integer(6), &ctx).unwrap();
        let avg = transform.aggregate(&[(&low, 1.0), (&high, 1.0)], &ctx, true).unwrap();
        let value = transform.inverse_embed(&avg, &ctx).unwrap();
        assert!((value - 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_vector_space_aggregation() {
        let transform = EmbeddingTransform::Categorical(
            CategoricalEmbedding::new(CategoricalEmbeddingConfig::new(vec!["a".into(), "b".into()]).unwrap())
                .unwrap(),
        );
        let ctx = ExecutionContext::ingestion(0);
        let a = transform.embed(&FieldValue::String("a".into()), &ctx).unwrap();
        let b = transform.embed(&FieldValue::String("b".into()), &ctx).unwrap();
        let sum = transform.aggregate(&[(&a, 1.0), (&b, 1.0)], &ctx, true).unwrap();
        assert!(sum.as_slice()[0] > 0.0 && sum.as_slice()[1] > 0.0);
        assert!(transform.aggregate(&[], &ctx, true).unwrap().is_empty());
    }

    #[test]
    fn test_model_space_needs_provider() {
        let transform = EmbeddingTransform::Model(ModelEmbeddingConfig::text("m", 8).unwrap());
        let ctx = ExecutionContext::ingestion(0);
        assert!(transform.embed(&FieldValue::String("x".into()), &ctx).is_err());
        assert_eq!(transform.normalization(), Normalization::L2);
    }

    #[tokio::test]
    async fn test_custom_space_passes_vectors_through() {
        let transform = EmbeddingTransform::Custom(CustomEmbedding::new(2).unwrap());
        let ctx = ExecutionContext::ingestion(0);
        let vectors = transform
            .embed_values(
                &[Some(FieldValue::FloatList(vec![0.0, 2.0])), None],
                &ctx,
                &ModelRegistry::new(),
                &RetryPolicy::none(),
            )
            .await
            .unwrap();
        assert_eq!(vectors[0].as_slice(), &[0.0, 1.0]);
        assert_eq!(vectors[1], Vector::zeros(2));
        assert!(transform.embed(&FieldValue::FloatList(vec![1.0]), &ctx).is_err());
        assert!(transform.embed(&FieldValue::String("x".into()), &ctx).is_err());

        let summed = transform.aggregate(&[(&vectors[0], 1.0), (&vectors[0], 1.0)], &ctx, true).unwrap();
        assert!((summed.norm() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_embed_values_batches_model_calls() {
        let transform = EmbeddingTransform::Model(ModelEmbeddingConfig::text("hash", 16).unwrap());
        let registry = ModelRegistry::new().with_provider("hash", Arc::new(HashingModelProvider::new(16)));
        let vectors = transform
            .embed_values(
                &[Some(FieldValue::String("shoes".into())), None],
                &ExecutionContext::ingestion(0),
                &registry,
                &RetryPolicy::none(),
            )
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert!((vectors[0].norm() - 1.0).abs() < 1e-6);
        assert_eq!(vectors[1], Vector::zeros(16));
    }

    #[test]
    fn test_serde_round_trip_is_tagged() {
        let json = serde_json::to_value(rating()).unwrap();
        assert_eq!(json["kind"], "number");
        let back: EmbeddingTransform = serde_json::from_value(json).unwrap();
        assert_eq!(back, rating());
    }
}
