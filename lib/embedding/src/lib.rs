//! # linkvec Embedding
//!
//! Embedding transforms turning typed field values into vectors.
//!
//! ## Overview
//!
//! Every space of an index owns one transform:
//!
//! | transform | input | length |
//! |---|---|---|
//! | [`NumberEmbedding`] | bounded scalar | 3 |
//! | [`CategoricalEmbedding`] | category or list of categories | categories + 1 |
//! | [`RecencyEmbedding`] | creation timestamp | 2 · periods + 1 |
//! | model-backed ([`ModelEmbeddingConfig`]) | text or image | model dimension |
//! | [`CustomEmbedding`] | precomputed vector | declared length |
//!
//! Number and recency vectors can be inverted back to scalars, which lets
//! aggregation average values instead of vectors.
//!
//! ```rust
//! use linkvec_core::ExecutionContext;
//! use linkvec_embedding::{NumberEmbedding, NumberEmbeddingConfig, NumberMode};
//!
//! let rating = NumberEmbedding::new(
//!     NumberEmbeddingConfig::new(1.0, 5.0, NumberMode::Maximum).unwrap(),
//! ).unwrap();
//! let vector = rating.embed(4.0, &ExecutionContext::ingestion(0));
//! assert_eq!(vector.dim(), 3);
//! ```

pub mod categorical;
pub mod chunking;
pub mod custom;
pub mod model;
pub mod normalization;
pub mod number;
pub mod recency;
pub mod transform;

pub use categorical::{CategoricalEmbedding, CategoricalEmbeddingConfig};
pub use chunking::ChunkingConfig;
pub use custom::CustomEmbedding;
pub use model::{
    BatchingModelProvider, HashingModelProvider, Modality, ModelEmbedding, ModelEmbeddingConfig,
    ModelInput, ModelProvider, ModelRegistry,
};
pub use normalization::Normalization;
pub use number::{NumberEmbedding, NumberEmbeddingConfig, NumberMode};
pub use recency::{PeriodTime, RecencyEmbedding, RecencyEmbeddingConfig};
pub use transform::EmbeddingTransform;
