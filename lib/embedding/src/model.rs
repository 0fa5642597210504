//! Model-backed text and image embeddings
//!
//! Numeric generation is delegated to a [`ModelProvider`]. The
//! [`ModelEmbedding`] transform owns everything around the call: it sends
//! all non-null inputs of a batch in one request, substitutes the zero
//! vector for null inputs, checks the returned dimensionality and
//! L2-normalizes the results.

use async_trait::async_trait;
use linkvec_core::{
    retry_idempotent, BatchConfig, BatchHandler, Error, MicroBatcher, Result, RetryPolicy, Vector,
};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

/// A single input handed to a model provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelInput {
    Text(String),
    /// Image location or encoded payload.
    Image(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
}

/// External embedding model.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// One vector per input, in order.
    async fn embed_batch(&self, inputs: &[ModelInput]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}

/// Named model providers available to the evaluator.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn ModelProvider>) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ModelProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::InvalidConfig(format!("no model provider registered as {}", name)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelEmbeddingConfig {
    /// Name of the provider in the [`ModelRegistry`].
    pub model: String,
    pub length: usize,
    pub modality: Modality,
}

impl ModelEmbeddingConfig {
    pub fn text(model: impl Into<String>, length: usize) -> Result<Self> {
        Self::new(model, length, Modality::Text)
    }

    pub fn image(model: impl Into<String>, length: usize) -> Result<Self> {
        Self::new(model, length, Modality::Image)
    }

    fn new(model: impl Into<String>, length: usize, modality: Modality) -> Result<Self> {
        if length == 0 {
            return Err(Error::InvalidConfig("model embedding length must be positive".into()));
        }
        Ok(Self {
            model: model.into(),
            length,
            modality,
        })
    }

    /// Wrap a raw value as input of this config's modality.
    #[must_use]
    pub fn input(&self, value: String) -> ModelInput {
        match self.modality {
            Modality::Text => ModelInput::Text(value),
            Modality::Image => ModelInput::Image(value),
        }
    }
}

/// A model-backed transform bound to its provider.
pub struct ModelEmbedding<'a> {
    config: &'a ModelEmbeddingConfig,
    provider: Arc<dyn ModelProvider>,
    retry: &'a RetryPolicy,
}

impl<'a> ModelEmbedding<'a> {
    pub fn bind(
        config: &'a ModelEmbeddingConfig,
        registry: &ModelRegistry,
        retry: &'a RetryPolicy,
    ) -> Result<Self> {
        let provider = registry.get(&config.model)?;
        if provider.dimension() != config.length {
            return Err(Error::InvalidDimension {
                expected: config.length,
                actual: provider.dimension(),
            });
        }
        Ok(Self {
            config,
            provider,
            retry,
        })
    }

    #[must_use]
    pub fn default_vector(&self) -> Vector {
        Vector::zeros(self.config.length)
    }

    /// Embed a batch; `None` entries get the default vector without a model call.
    pub async fn embed_batch(&self, inputs: &[Option<ModelInput>]) -> Result<Vec<Vector>> {
        let present: Vec<ModelInput> = inputs.iter().flatten().cloned().collect();
        let generated = if present.is_empty() {
            Vec::new()
        } else {
            debug!(model = %self.config.model, inputs = present.len(), "calling model provider");
            retry_idempotent(self.retry, "embed", || self.provider.embed_batch(&present)).await?
        };
        if generated.len() != present.len() {
            return Err(Error::ProviderUnavailable(format!(
                "model {} returned {} vectors for {} inputs",
                self.config.model,
                generated.len(),
                present.len()
            )));
        }

        let mut generated = generated.into_iter();
        let mut vectors = Vec::with_capacity(inputs.len());
        for input in inputs {
            if input.is_none() {
                vectors.push(self.default_vector());
                continue;
            }
            let raw = generated.next().unwrap_or_default();
            if raw.len() != self.config.length {
                return Err(Error::InvalidDimension {
                    expected: self.config.length,
                    actual: raw.len(),
                });
            }
            vectors.push(Vector::new(raw).normalized());
        }
        Ok(vectors)
    }
}

/// Deterministic provider hashing character trigrams and words into buckets.
/// Needs no model server, so it backs tests and offline runs.
#[derive(Debug, Clone)]
pub struct HashingModelProvider {
    dimension: usize,
}

impl HashingModelProvider {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimension
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let normalized = text.to_lowercase();
        let chars: Vec<char> = format!("  {}  ", normalized).chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            vector[self.bucket(&trigram)] += 1.0;
        }
        // words weigh more than trigrams
        for word in normalized.split_whitespace() {
            vector[self.bucket(word)] += 2.0;
        }
        vector
    }
}

#[async_trait]
impl ModelProvider for HashingModelProvider {
    async fn embed_batch(&self, inputs: &[ModelInput]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs
            .iter()
            .map(|input| match input {
                ModelInput::Text(text) => self.embed_text(text),
                ModelInput::Image(location) => self.embed_text(&format!("image:{}", location)),
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

struct ProviderHandler {
    inner: Arc<dyn ModelProvider>,
}

#[async_trait]
impl BatchHandler<ModelInput, Vec<f32>> for ProviderHandler {
    async fn handle(&self, inputs: Vec<ModelInput>) -> Result<Vec<Vec<f32>>> {
        self.inner.embed_batch(&inputs).await
    }
}

/// Provider wrapper coalescing concurrent calls within a debounce window.
pub struct BatchingModelProvider {
    batcher: MicroBatcher<ModelInput, Vec<f32>>,
    dimension: usize,
}

impl BatchingModelProvider {
    /// Must be called within a tokio runtime.
    pub fn new(inner: Arc<dyn ModelProvider>, config: BatchConfig) -> Self {
        let dimension = inner.dimension();
        let batcher = MicroBatcher::spawn(Arc::new(ProviderHandler { inner }), config);
        Self { batcher, dimension }
    }
}

#[async_trait]
impl ModelProvider for BatchingModelProvider {
    async fn embed_batch(&self, inputs: &[ModelInput]) -> Result<Vec<Vec<f32>>> {
        self.batcher.submit(inputs.to_vec()).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
