//! # linkvec Core
//!
//! Core library for the linkvec embedding engine.
//!
//! This crate provides the fundamental data structures shared by every
//! other crate of the workspace:
//!
//! - [`Vector`] - Dense vector with negative-filter components
//! - [`EntitySchema`] / [`SchemaField`] - Schema declarations
//! - [`FieldValue`] / [`NodeValue`] - Parsed field values and node outputs
//! - [`aggregation`] - Weighted vector sums and scalar aggregations
//! - [`MicroBatcher`] - Debounced request coalescing
//!
//! ## Example
//!
//! ```rust
//! use linkvec_core::{aggregation::aggregate_weighted, Vector};
//!
//! let liked = Vector::new(vec![1.0, 0.0]);
//! let viewed = Vector::new(vec![0.0, 1.0]);
//! let blended = aggregate_weighted([(&liked, 0.75), (&viewed, 0.25)]).unwrap();
//! assert_eq!(blended.as_slice(), &[0.75, 0.25]);
//! ```

pub mod aggregation;
pub mod batcher;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod filter;
pub mod retry;
pub mod schema;
pub mod value;
pub mod vector;

pub use aggregation::{NumberAggregation, NOT_AFFECTING_WEIGHT};
pub use batcher::{BatchHandler, MicroBatcher};
pub use config::{BatchConfig, EngineConfig, RetryPolicy};
pub use context::{unix_now, ExecutionContext, ExecutionEnvironment};
pub use entity::{EntityId, EvaluationResult, EventMetadata, NodeResultKey, ParsedEntity, SingleResult};
pub use error::{Error, ErrorKind, Result};
pub use filter::{ComparisonFilter, ComparisonOperator};
pub use retry::retry_idempotent;
pub use schema::{EntitySchema, FieldType, SchemaField, SchemaKind};
pub use value::{FieldValue, NodeValue};
pub use vector::Vector;
